//! End-to-end integration tests for Tollgate.
//!
//! These drive the public [`Tollgate`] facade the way a transport would:
//! register wallets, push subscription updates, gate queries and
//! transactions, link wallets, and read usage back. Time is pinned with a
//! [`ManualClock`] so trial windows and billing months are exact.
//!
//! Each test builds its own temporary store. No shared state between tests.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use tollgate_core::billing::SubscriptionUpdate;
use tollgate_core::clock::{Clock, ManualClock};
use tollgate_core::config::GateConfig;
use tollgate_core::gate::QuotaDecision;
use tollgate_core::identity::{
    ownership_message, Ed25519Verifier, Identity, PrimaryIdentity, RegistrationOutcome,
    SignatureError, UpstreamVerified, WalletKey, WalletOccupant,
};
use tollgate_core::plan::{Plan, PlanCatalogue};
use tollgate_core::portfolio::LinkOutcome;
use tollgate_core::storage::GateDB;
use tollgate_core::usage::{Period, TransactionStatus};
use tollgate_core::{ErrorCode, Tollgate};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CHAIN: &str = "1";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn setup() -> (Arc<Tollgate>, Arc<ManualClock>) {
    setup_with(PlanCatalogue::builtin())
}

fn setup_with(catalogue: PlanCatalogue) -> (Arc<Tollgate>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let tollgate = Tollgate::with_parts(
        GateDB::open_temporary().expect("temp db"),
        catalogue,
        GateConfig::default(),
        clock.clone(),
        Arc::new(UpstreamVerified),
    )
    .expect("tollgate");
    (Arc::new(tollgate), clock)
}

fn register(t: &Tollgate, wallet: &str) -> PrimaryIdentity {
    match t.register_primary(wallet, CHAIN, 700).unwrap() {
        RegistrationOutcome::Registered(p) => p,
        other => panic!("expected registration, got {other:?}"),
    }
}

fn subscribe(t: &Tollgate, clock: &ManualClock, id: uuid::Uuid, plan: &str) {
    t.apply_subscription_update(&SubscriptionUpdate {
        identity_id: id,
        plan_id: plan.into(),
        period_end: clock.now() + Duration::days(30),
        active: true,
    })
    .unwrap();
}

fn resolve(t: &Tollgate, wallet: &str) -> Identity {
    t.resolve_identity(wallet, CHAIN)
        .unwrap()
        .expect("wallet should resolve")
}

/// Gate, and on allow record, like a real caller would.
fn query(t: &Tollgate, wallet: &str) -> QuotaDecision {
    let auth = t.authorize_query(wallet, CHAIN).unwrap();
    if let (QuotaDecision::Allow, Some(identity)) = (&auth.decision, &auth.identity) {
        t.record_query(identity, t.current_period()).unwrap();
    }
    auth.decision
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[test]
fn resolution_ignores_casing_and_preserves_display() {
    let (t, _) = setup();
    let p = register(&t, "0xC0FFEE00aa");

    for variant in ["0xC0FFEE00aa", "0xc0ffee00aa", "0XC0FFEE00AA"] {
        let identity = resolve(&t, variant);
        assert_eq!(identity.id(), p.id);
        assert_eq!(identity.wallet_address(), "0xC0FFEE00aa");
    }
}

#[test]
fn unregistered_wallet_is_denied_not_errored() {
    let (t, _) = setup();
    assert_eq!(t.resolve_identity("0xnobody", CHAIN).unwrap(), None);
    let auth = t.authorize_query("0xnobody", CHAIN).unwrap();
    assert_eq!(
        auth.decision,
        QuotaDecision::Deny(ErrorCode::WalletNotRegistered)
    );
    assert!(auth.identity.is_none());
}

#[test]
fn registering_a_linked_wallet_reports_the_link() {
    let (t, clock) = setup();
    let owner = register(&t, "0xowner");
    subscribe(&t, &clock, owner.id, "basic");
    let LinkOutcome::Linked(linked) = t
        .link_wallet(&resolve(&t, "0xowner"), "0xlinked", CHAIN)
        .unwrap()
    else {
        panic!("expected link");
    };

    assert_eq!(
        t.register_primary("0xLINKED", CHAIN, 0).unwrap(),
        RegistrationOutcome::AlreadyRegistered(WalletOccupant::Linked {
            id: linked.id,
            parent_id: owner.id,
        })
    );
}

// ---------------------------------------------------------------------------
// Entitlement
// ---------------------------------------------------------------------------

#[test]
fn linked_entitlement_matches_parent_across_plan_changes() {
    let (t, clock) = setup();
    let owner = register(&t, "0xowner");
    subscribe(&t, &clock, owner.id, "pro");
    t.link_wallet(&resolve(&t, "0xowner"), "0xlinked", CHAIN)
        .unwrap();

    let check = |expected: &str| {
        let parent = t.get_entitlement(&resolve(&t, "0xowner")).unwrap();
        let linked = t.get_entitlement(&resolve(&t, "0xlinked")).unwrap();
        assert_eq!(parent, linked);
        assert_eq!(parent.plan_name, expected);
    };
    check("pro");

    subscribe(&t, &clock, owner.id, "enterprise");
    check("enterprise");
    let Identity::Linked { linked, .. } = resolve(&t, "0xlinked") else {
        panic!("expected linked identity");
    };
    assert_eq!(linked.plan_name, "enterprise");

    // Let the subscription lapse: both drop to free together.
    clock.advance(Duration::days(31));
    check("free");
}

// ---------------------------------------------------------------------------
// Query Gate
// ---------------------------------------------------------------------------

#[test]
fn free_plan_fresh_trial_allows_exactly_one_hundred() {
    let (t, _) = setup();
    register(&t, "0xfree");

    for n in 1..=100 {
        assert_eq!(query(&t, "0xfree"), QuotaDecision::Allow, "query {n}");
    }
    assert_eq!(
        query(&t, "0xfree"),
        QuotaDecision::Deny(ErrorCode::QueryLimitExceeded)
    );
}

#[test]
fn expired_trial_denies_despite_headroom() {
    let (t, clock) = setup();
    register(&t, "0xtrial");
    for _ in 0..10 {
        assert!(query(&t, "0xtrial").is_allowed());
    }

    clock.advance(Duration::days(6));
    assert_eq!(
        query(&t, "0xtrial"),
        QuotaDecision::Deny(ErrorCode::TrialExpired)
    );
    let usage = t.usage_report(&resolve(&t, "0xtrial"), None).unwrap();
    assert_eq!(usage.queries_used, 10);
    assert!(usage.entitlement.trial_expired);
}

#[test]
fn trial_boundary_days() {
    let (t, clock) = setup();
    register(&t, "0xedge");

    clock.advance(Duration::days(4));
    let e = t.get_entitlement(&resolve(&t, "0xedge")).unwrap();
    assert!(e.trial_active);
    assert_eq!(e.trial_days_remaining, 1);

    clock.advance(Duration::days(1));
    let e = t.get_entitlement(&resolve(&t, "0xedge")).unwrap();
    assert!(!e.trial_active);
    assert!(e.trial_expired);
}

#[test]
fn paid_plan_query_boundary() {
    let catalogue = PlanCatalogue::new(
        vec![
            Plan::new("free", 100, 1, Some(100_000), 0),
            Plan::new("tiny", 3, 2, None, 100),
        ],
        "free",
    )
    .unwrap();
    let (t, clock) = setup_with(catalogue);
    let p = register(&t, "0xtiny");
    subscribe(&t, &clock, p.id, "tiny");

    // Paid: trial state no longer matters, even long after it would have run out.
    clock.advance(Duration::days(10));
    assert!(query(&t, "0xtiny").is_allowed());
    assert!(query(&t, "0xtiny").is_allowed());
    // used == limit - 1
    assert!(query(&t, "0xtiny").is_allowed());
    // used == limit
    assert_eq!(
        query(&t, "0xtiny"),
        QuotaDecision::Deny(ErrorCode::QueryLimitExceeded)
    );
}

#[test]
fn new_month_resets_the_counter() {
    let (t, clock) = setup();
    let p = register(&t, "0xmonthly");
    subscribe(&t, &clock, p.id, "basic");
    for _ in 0..5 {
        query(&t, "0xmonthly");
    }

    clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 1).unwrap());
    subscribe(&t, &clock, p.id, "basic");
    let identity = resolve(&t, "0xmonthly");
    assert_eq!(t.usage_report(&identity, None).unwrap().queries_used, 0);
    let march = Period::new(2026, 3).unwrap();
    assert_eq!(
        t.usage_report(&identity, Some(march)).unwrap().queries_used,
        5
    );
}

#[test]
fn gate_never_counts_on_its_own() {
    let (t, _) = setup();
    register(&t, "0xpeek");
    for _ in 0..20 {
        assert!(t.authorize_query("0xpeek", CHAIN).unwrap().decision.is_allowed());
    }
    let usage = t.usage_report(&resolve(&t, "0xpeek"), None).unwrap();
    assert_eq!(usage.queries_used, 0);
}

#[test]
fn concurrent_recording_is_exact() {
    let (t, _) = setup();
    register(&t, "0xbusy");
    let identity = resolve(&t, "0xbusy");
    let period = t.current_period();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let t = Arc::clone(&t);
            let identity = identity.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    t.record_query(&identity, period).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(t.usage_report(&identity, None).unwrap().queries_used, 1_000);
}

#[test]
fn linked_wallets_share_the_owner_quota() {
    let catalogue = PlanCatalogue::new(
        vec![
            Plan::new("free", 100, 1, Some(100_000), 0),
            Plan::new("pair", 4, 2, None, 100),
        ],
        "free",
    )
    .unwrap();
    let (t, clock) = setup_with(catalogue);
    let owner = register(&t, "0xowner");
    subscribe(&t, &clock, owner.id, "pair");
    t.link_wallet(&resolve(&t, "0xowner"), "0xlinked", CHAIN)
        .unwrap();

    assert!(query(&t, "0xowner").is_allowed());
    assert!(query(&t, "0xlinked").is_allowed());
    assert!(query(&t, "0xowner").is_allowed());
    assert!(query(&t, "0xlinked").is_allowed());
    assert_eq!(
        query(&t, "0xlinked"),
        QuotaDecision::Deny(ErrorCode::QueryLimitExceeded)
    );
    assert_eq!(
        query(&t, "0xowner"),
        QuotaDecision::Deny(ErrorCode::QueryLimitExceeded)
    );
}

// ---------------------------------------------------------------------------
// Transaction Gate
// ---------------------------------------------------------------------------

#[test]
fn pro_plan_transaction_scenario() {
    let (t, clock) = setup();
    let p = register(&t, "0xmerchant");
    subscribe(&t, &clock, p.id, "pro");
    let identity = resolve(&t, "0xmerchant");

    // $19,500 already moved this month, plus noise that must not count.
    t.record_transaction(&identity, 1_500_000, TransactionStatus::Succeeded)
        .unwrap();
    t.record_transaction(&identity, 450_000, TransactionStatus::Succeeded)
        .unwrap();
    t.record_transaction(&identity, 900_000, TransactionStatus::Failed)
        .unwrap();
    t.record_transaction(&identity, 300_000, TransactionStatus::Pending)
        .unwrap();
    assert_eq!(t.current_volume(&identity).unwrap(), 1_950_000);

    assert_eq!(
        t.authorize_transaction("0xmerchant", CHAIN, 70_000)
            .unwrap()
            .decision,
        QuotaDecision::Deny(ErrorCode::PlanTxnLimitExceeded)
    );
    assert_eq!(
        t.authorize_transaction("0xmerchant", CHAIN, 40_000)
            .unwrap()
            .decision,
        QuotaDecision::Allow
    );
}

#[test]
fn enterprise_volume_is_unlimited() {
    let (t, clock) = setup();
    let p = register(&t, "0xwhale");
    subscribe(&t, &clock, p.id, "enterprise");
    let identity = resolve(&t, "0xwhale");
    t.record_transaction(&identity, u64::MAX / 2, TransactionStatus::Succeeded)
        .unwrap();
    assert!(t
        .check_transaction_quota(&identity, u64::MAX / 2)
        .unwrap()
        .is_allowed());
}

#[test]
fn transaction_gate_for_unknown_wallet() {
    let (t, _) = setup();
    assert_eq!(
        t.authorize_transaction("0xghost", CHAIN, 100)
            .unwrap()
            .decision,
        QuotaDecision::Deny(ErrorCode::WalletNotRegistered)
    );
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

#[test]
fn link_conflict_scenarios() {
    let (t, clock) = setup();
    let o1 = register(&t, "0xowner1");
    let o2 = register(&t, "0xowner2");
    subscribe(&t, &clock, o1.id, "pro");
    subscribe(&t, &clock, o2.id, "pro");
    let owner1 = resolve(&t, "0xowner1");
    let owner2 = resolve(&t, "0xowner2");

    assert!(matches!(
        t.link_wallet(&owner2, "0xshared", CHAIN).unwrap(),
        LinkOutcome::Linked(_)
    ));
    assert_eq!(
        t.link_wallet(&owner1, "0xshared", CHAIN).unwrap(),
        LinkOutcome::Rejected(ErrorCode::WalletExistsOtherUser)
    );

    assert!(matches!(
        t.link_wallet(&owner1, "0xmine", CHAIN).unwrap(),
        LinkOutcome::Linked(_)
    ));
    assert_eq!(
        t.link_wallet(&owner1, "0xMINE", CHAIN).unwrap(),
        LinkOutcome::Rejected(ErrorCode::WalletExistsSameUser)
    );
    assert_eq!(
        t.link_wallet(&owner1, "0xowner1", CHAIN).unwrap(),
        LinkOutcome::Rejected(ErrorCode::CannotAddPrimaryWallet)
    );
    assert_eq!(
        t.link_wallet(&owner1, "0xowner2", CHAIN).unwrap(),
        LinkOutcome::Rejected(ErrorCode::WalletExistsPrimary)
    );
}

#[test]
fn wallet_limit_boundary() {
    let (t, clock) = setup();
    let p = register(&t, "0xowner");
    subscribe(&t, &clock, p.id, "pro"); // 5 wallets: primary + 4
    let owner = resolve(&t, "0xowner");

    for i in 0..3 {
        assert!(matches!(
            t.link_wallet(&owner, &format!("0xw{i:02}"), CHAIN).unwrap(),
            LinkOutcome::Linked(_)
        ));
    }
    // used == max - 1: exactly one more.
    assert!(matches!(
        t.link_wallet(&owner, "0xw03", CHAIN).unwrap(),
        LinkOutcome::Linked(_)
    ));
    // used == max.
    assert_eq!(
        t.link_wallet(&owner, "0xw04", CHAIN).unwrap(),
        LinkOutcome::Rejected(ErrorCode::WalletLimitExceeded)
    );
    assert_eq!(t.linked_wallets(&owner).unwrap().len(), 4);
}

#[test]
fn concurrent_links_on_last_slot() {
    let (t, clock) = setup();
    let p = register(&t, "0xowner");
    subscribe(&t, &clock, p.id, "basic"); // primary + 2
    let owner = resolve(&t, "0xowner");
    t.link_wallet(&owner, "0xfirst", CHAIN).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let t = Arc::clone(&t);
            let owner = owner.clone();
            thread::spawn(move || t.link_wallet(&owner, &format!("0xrace{i}"), CHAIN).unwrap())
        })
        .collect();
    let outcomes: Vec<LinkOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let linked = outcomes
        .iter()
        .filter(|o| matches!(o, LinkOutcome::Linked(_)))
        .count();
    assert_eq!(linked, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        LinkOutcome::Linked(_) | LinkOutcome::Rejected(ErrorCode::WalletLimitExceeded)
    )));
    assert_eq!(t.linked_wallets(&owner).unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Ownership Proofs & Persistence
// ---------------------------------------------------------------------------

#[test]
fn ed25519_ownership_proof_gates_registration() {
    let tollgate = Tollgate::with_parts(
        GateDB::open_temporary().unwrap(),
        PlanCatalogue::builtin(),
        GateConfig::default(),
        Arc::new(ManualClock::new(start())),
        Arc::new(Ed25519Verifier::default()),
    )
    .unwrap();

    let signing = SigningKey::generate(&mut OsRng);
    let address = bs58::encode(signing.verifying_key().as_bytes()).into_string();
    let wallet = WalletKey::parse(&address, "solana").unwrap();
    let good = bs58::encode(signing.sign(&ownership_message("register", &wallet)).to_bytes())
        .into_string();
    let wrong_action =
        bs58::encode(signing.sign(&ownership_message("link", &wallet)).to_bytes()).into_string();

    assert_eq!(
        tollgate.verify_ownership("register", &wallet, &wrong_action),
        Err(SignatureError::VerificationFailed)
    );
    assert_eq!(tollgate.verify_ownership("register", &wallet, &good), Ok(()));
    assert!(matches!(
        tollgate.register_primary(&address, "solana", 0).unwrap(),
        RegistrationOutcome::Registered(_)
    ));
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(start()));
    let open = || {
        Tollgate::with_parts(
            GateDB::open(dir.path()).expect("open db"),
            PlanCatalogue::builtin(),
            GateConfig::default(),
            clock.clone(),
            Arc::new(UpstreamVerified),
        )
        .unwrap()
    };

    {
        let t = open();
        let p = register(&t, "0xdurable");
        subscribe(&t, &clock, p.id, "basic");
        query(&t, "0xdurable");
        query(&t, "0xdurable");
        t.db().flush().unwrap();
    }

    let t = open();
    let identity = resolve(&t, "0xdurable");
    let report = t.usage_report(&identity, None).unwrap();
    assert_eq!(report.entitlement.plan_name, "basic");
    assert_eq!(report.queries_used, 2);
}
