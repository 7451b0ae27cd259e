//! # Tollgate Service
//!
//! [`Tollgate`] wires the store, the catalogue, the clock and the signature
//! verifier into the components and exposes the operations a transport
//! (the node's HTTP API, a gRPC shim, a test) actually calls.
//!
//! It holds no mutable state of its own. Share it behind an `Arc` and call
//! it from as many threads as you like.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::{SubscriptionApplied, SubscriptionSync, SubscriptionUpdate};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::entitlement::{Entitlement, EntitlementCalculator};
use crate::error::{GateResult, ValidationError};
use crate::gate::{Authorization, Metered, Metering, QuotaDecision, QuotaGate};
use crate::identity::{
    link_message, ownership_message, Ed25519Verifier, Identity, IdentityRegistry, IdentityResolver,
    LinkedIdentity, PrimaryIdentity, RegistrationOutcome, SignatureError, SignatureVerifier,
    WalletKey,
};
use crate::plan::{CatalogueError, PlanCatalogue};
use crate::portfolio::{LinkOutcome, PortfolioManager};
use crate::storage::GateDB;
use crate::usage::{Period, TransactionRecord, TransactionStatus, UsageLedger};

/// Usage snapshot for one identity and month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub identity_id: Uuid,
    /// The primary whose quota is being drawn down.
    pub billing_id: Uuid,
    pub period: String,
    pub entitlement: Entitlement,
    pub queries_used: u64,
    pub queries_remaining: u64,
    pub transaction_volume: u64,
    /// `None` when volume is unlimited.
    pub volume_remaining: Option<u64>,
    pub linked_wallets: u32,
}

/// Identity resolution and entitlement enforcement, all in one place.
pub struct Tollgate {
    db: GateDB,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn SignatureVerifier>,
    resolver: IdentityResolver,
    registry: Arc<IdentityRegistry>,
    entitlements: EntitlementCalculator,
    ledger: UsageLedger,
    gate: QuotaGate,
    portfolio: PortfolioManager,
    billing: SubscriptionSync,
}

impl Tollgate {
    /// System clock, Ed25519 ownership proofs.
    pub fn new(db: GateDB, catalogue: PlanCatalogue, config: GateConfig) -> GateResult<Self> {
        Self::with_parts(
            db,
            catalogue,
            config,
            Arc::new(SystemClock),
            Arc::new(Ed25519Verifier::default()),
        )
    }

    /// Full control over the clock and the verifier.
    ///
    /// # Errors
    ///
    /// [`CatalogueError::MissingFreePlan`] if `config.free_plan` isn't the
    /// catalogue's free plan.
    pub fn with_parts(
        db: GateDB,
        catalogue: PlanCatalogue,
        config: GateConfig,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> GateResult<Self> {
        if !catalogue.is_free(&config.free_plan) {
            return Err(CatalogueError::MissingFreePlan(config.free_plan).into());
        }

        let catalogue = Arc::new(catalogue);
        let entitlements = EntitlementCalculator::new(catalogue, config);
        let resolver = IdentityResolver::new(db.clone());
        let registry = Arc::new(IdentityRegistry::new(db.clone(), clock.clone()));
        let ledger = UsageLedger::new(db.clone());
        let gate = QuotaGate::new(
            resolver.clone(),
            entitlements.clone(),
            ledger.clone(),
            registry.clone(),
            clock.clone(),
        );
        let portfolio = PortfolioManager::new(db.clone(), entitlements.clone(), clock.clone());
        let billing = SubscriptionSync::new(db.clone(), entitlements.clone(), clock.clone());

        Ok(Self {
            db,
            clock,
            verifier,
            resolver,
            registry,
            entitlements,
            ledger,
            gate,
            portfolio,
            billing,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn current_period(&self) -> Period {
        Period::containing(self.now())
    }

    pub fn catalogue(&self) -> &PlanCatalogue {
        self.entitlements.catalogue()
    }

    pub fn config(&self) -> &GateConfig {
        self.entitlements.config()
    }

    pub fn db(&self) -> &GateDB {
        &self.db
    }

    // -- Identity -----------------------------------------------------------

    pub fn resolve_identity(&self, wallet: &str, chain: &str) -> GateResult<Option<Identity>> {
        self.resolver.resolve(wallet, chain)
    }

    pub fn identity_by_id(&self, id: Uuid) -> GateResult<Option<Identity>> {
        self.resolver.resolve_by_id(id)
    }

    /// Checks a signature over [`ownership_message`] for `action`.
    pub fn verify_ownership(
        &self,
        action: &str,
        wallet: &WalletKey,
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.verifier
            .verify(wallet, &ownership_message(action, wallet), signature)
    }

    /// Checks that both `owner` and `wallet` signed [`link_message`].
    /// The owner is checked first.
    pub fn verify_link(
        &self,
        owner: &WalletKey,
        wallet: &WalletKey,
        owner_signature: &str,
        wallet_signature: &str,
    ) -> Result<(), SignatureError> {
        let message = link_message(owner, wallet);
        self.verifier.verify(owner, &message, owner_signature)?;
        self.verifier.verify(wallet, &message, wallet_signature)
    }

    /// Registers a primary. Ownership must already be verified.
    pub fn register_primary(
        &self,
        wallet: &str,
        chain: &str,
        credit_score: u32,
    ) -> GateResult<RegistrationOutcome> {
        let key = WalletKey::parse(wallet, chain)?;
        self.registry.register_primary(&key, credit_score)
    }

    pub fn set_credit_score(&self, id: Uuid, score: u32) -> GateResult<PrimaryIdentity> {
        self.registry.set_credit_score(id, score)
    }

    // -- Entitlement & gates ------------------------------------------------

    pub fn get_entitlement(&self, identity: &Identity) -> GateResult<Entitlement> {
        self.entitlements.compute(identity, self.now())
    }

    pub fn check_query_quota(&self, identity: &Identity) -> GateResult<QuotaDecision> {
        self.gate.check_query_quota(identity)
    }

    pub fn authorize_query(&self, wallet: &str, chain: &str) -> GateResult<Authorization> {
        self.gate.authorize_query(wallet, chain)
    }

    /// Charges one query to the identity's billing owner in `period`.
    pub fn record_query(&self, identity: &Identity, period: Period) -> GateResult<u64> {
        self.ledger.record_query(identity.billing_id(), period)
    }

    pub fn run_metered<T, E, F>(
        &self,
        wallet: &str,
        chain: &str,
        metering: Metering,
        op: F,
    ) -> GateResult<Metered<T, E>>
    where
        F: FnOnce(&Identity) -> Result<T, E>,
    {
        self.gate.run_metered(wallet, chain, metering, op)
    }

    pub fn check_transaction_quota(
        &self,
        identity: &Identity,
        amount: u64,
    ) -> GateResult<QuotaDecision> {
        self.gate.check_transaction_quota(identity, amount)
    }

    pub fn authorize_transaction(
        &self,
        wallet: &str,
        chain: &str,
        amount: u64,
    ) -> GateResult<Authorization> {
        self.gate.authorize_transaction(wallet, chain, amount)
    }

    /// Records a transaction outcome against the billing owner, stamped now.
    pub fn record_transaction(
        &self,
        identity: &Identity,
        amount: u64,
        status: TransactionStatus,
    ) -> GateResult<TransactionRecord> {
        self.ledger
            .record_transaction(identity.billing_id(), amount, status, self.now())
    }

    pub fn current_volume(&self, identity: &Identity) -> GateResult<u64> {
        self.ledger
            .current_volume(identity.billing_id(), self.current_period())
    }

    // -- Portfolio ----------------------------------------------------------

    pub fn link_wallet(
        &self,
        owner: &Identity,
        wallet: &str,
        chain: &str,
    ) -> GateResult<LinkOutcome> {
        let key = WalletKey::parse(wallet, chain)?;
        self.portfolio.link_wallet(owner, &key)
    }

    pub fn linked_wallets(&self, owner: &Identity) -> GateResult<Vec<LinkedIdentity>> {
        self.portfolio.linked_wallets(owner)
    }

    // -- Billing ------------------------------------------------------------

    pub fn apply_subscription_update(
        &self,
        update: &SubscriptionUpdate,
    ) -> GateResult<SubscriptionApplied> {
        self.billing.apply_subscription_update(update)
    }

    // -- Reporting ----------------------------------------------------------

    /// Entitlement plus usage for `period` (the current month if `None`).
    ///
    /// Usage in a past period is reported against today's entitlement.
    pub fn usage_report(
        &self,
        identity: &Identity,
        period: Option<Period>,
    ) -> GateResult<UsageReport> {
        let period = period.unwrap_or_else(|| self.current_period());
        let entitlement = self.get_entitlement(identity)?;
        let billing_id = identity.billing_id();
        let queries_used = self.ledger.get_usage(billing_id, period)?;
        let transaction_volume = self.ledger.current_volume(billing_id, period)?;
        let linked_wallets = self.portfolio.linked_count(identity)?;

        Ok(UsageReport {
            identity_id: identity.id(),
            billing_id,
            period: period.to_string(),
            queries_remaining: entitlement.query_limit.saturating_sub(queries_used),
            volume_remaining: entitlement
                .txn_limit
                .map(|limit| limit.saturating_sub(transaction_volume)),
            entitlement,
            queries_used,
            transaction_volume,
            linked_wallets,
        })
    }

    /// Parses `YYYY-MM`, for transports that take the period as text.
    pub fn parse_period(raw: &str) -> Result<Period, ValidationError> {
        raw.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorCode, GateError};
    use crate::identity::UpstreamVerified;
    use chrono::{Duration, TimeZone};

    fn service() -> (Tollgate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap(),
        ));
        let tollgate = Tollgate::with_parts(
            GateDB::open_temporary().unwrap(),
            PlanCatalogue::builtin(),
            GateConfig::default(),
            clock.clone(),
            Arc::new(UpstreamVerified),
        )
        .unwrap();
        (tollgate, clock)
    }

    fn register(t: &Tollgate, wallet: &str) -> PrimaryIdentity {
        match t.register_primary(wallet, "1", 650).unwrap() {
            RegistrationOutcome::Registered(p) => p,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_free_plan_is_rejected() {
        let config = GateConfig {
            free_plan: "starter".into(),
            ..GateConfig::default()
        };
        let result = Tollgate::new(
            GateDB::open_temporary().unwrap(),
            PlanCatalogue::builtin(),
            config,
        );
        assert!(matches!(
            result,
            Err(GateError::Catalogue(CatalogueError::MissingFreePlan(_)))
        ));
    }

    #[test]
    fn run_metered_counts_only_successes() {
        let (t, _) = service();
        register(&t, "0xmeter");

        let ok: Metered<u32, String> = t
            .run_metered("0xmeter", "1", Metering::Counted, |_| Ok(7))
            .unwrap();
        assert_eq!(ok, Metered::Completed(7));

        let failed: Metered<u32, String> = t
            .run_metered("0xmeter", "1", Metering::Counted, |_| Err("boom".to_string()))
            .unwrap();
        assert_eq!(failed, Metered::Failed("boom".to_string()));

        let exempt: Metered<u32, String> = t
            .run_metered("0xmeter", "1", Metering::Exempt, |_| Ok(1))
            .unwrap();
        assert_eq!(exempt, Metered::Completed(1));

        let identity = t.resolve_identity("0xmeter", "1").unwrap().unwrap();
        let report = t.usage_report(&identity, None).unwrap();
        assert_eq!(report.queries_used, 1);
        assert_eq!(report.queries_remaining, 99);
    }

    #[test]
    fn run_metered_keeps_value_when_recording_fails() {
        let (t, _) = service();
        let p = register(&t, "0xlossy");
        let period = t.current_period();

        let result: Metered<&str, ()> = t
            .run_metered("0xlossy", "1", Metering::Counted, |_| {
                t.db().put_raw_usage(p.id, period, b"bad");
                Ok("payload")
            })
            .unwrap();
        assert_eq!(result, Metered::Completed("payload"));
        assert!(t.db().get_usage(p.id, period).is_err());
    }

    #[test]
    fn link_needs_both_signatures_over_the_pair() {
        use ed25519_dalek::{Signer, SigningKey};
        use rand::rngs::OsRng;

        let t = Tollgate::with_parts(
            GateDB::open_temporary().unwrap(),
            PlanCatalogue::builtin(),
            GateConfig::default(),
            Arc::new(SystemClock),
            Arc::new(Ed25519Verifier::default()),
        )
        .unwrap();
        let wallet_of = |k: &SigningKey| {
            let address = bs58::encode(k.verifying_key().as_bytes()).into_string();
            WalletKey::parse(&address, "solana").unwrap()
        };
        let owner_key = SigningKey::generate(&mut OsRng);
        let new_key = SigningKey::generate(&mut OsRng);
        let (owner, wallet) = (wallet_of(&owner_key), wallet_of(&new_key));
        let sign = |k: &SigningKey, msg: &[u8]| hex::encode(k.sign(msg).to_bytes());

        let msg = link_message(&owner, &wallet);
        let owner_sig = sign(&owner_key, &msg);
        let wallet_sig = sign(&new_key, &msg);
        assert_eq!(t.verify_link(&owner, &wallet, &owner_sig, &wallet_sig), Ok(()));

        // The new wallet alone cannot vouch for the owner.
        let forged = sign(&new_key, &msg);
        assert_eq!(
            t.verify_link(&owner, &wallet, &forged, &wallet_sig),
            Err(SignatureError::VerificationFailed)
        );
        // A plain ownership proof is not a link proof.
        let plain = sign(&new_key, &ownership_message("link", &wallet));
        assert_eq!(
            t.verify_link(&owner, &wallet, &owner_sig, &plain),
            Err(SignatureError::VerificationFailed)
        );
    }

    #[test]
    fn run_metered_skips_operation_when_denied() {
        let (t, _) = service();
        let mut ran = false;
        let result: Metered<(), ()> = t
            .run_metered("0xghost", "1", Metering::Counted, |_| {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(result, Metered::Denied(ErrorCode::WalletNotRegistered));
        assert!(!ran);
    }

    #[test]
    fn gate_flips_trial_flag_once_expired() {
        let (t, clock) = service();
        let p = register(&t, "0xflip");
        clock.advance(Duration::days(6));

        let auth = t.authorize_query("0xflip", "1").unwrap();
        assert_eq!(auth.decision, QuotaDecision::Deny(ErrorCode::TrialExpired));
        let stored = t.db().get_primary(p.id).unwrap().unwrap();
        assert!(stored.trial.trial_used);
    }

    #[test]
    fn usage_report_for_linked_shows_owner_pool() {
        let (t, clock) = service();
        let owner = register(&t, "0xowner");
        t.apply_subscription_update(&SubscriptionUpdate {
            identity_id: owner.id,
            plan_id: "basic".into(),
            period_end: clock.now() + Duration::days(30),
            active: true,
        })
        .unwrap();

        let owner_identity = t.resolve_identity("0xowner", "1").unwrap().unwrap();
        let LinkOutcome::Linked(_) = t.link_wallet(&owner_identity, "0xsecond", "1").unwrap()
        else {
            panic!("expected link");
        };

        let linked = t.resolve_identity("0xsecond", "1").unwrap().unwrap();
        t.record_query(&linked, t.current_period()).unwrap();
        t.record_transaction(&linked, 12_500, TransactionStatus::Succeeded)
            .unwrap();

        let report = t.usage_report(&owner_identity, None).unwrap();
        assert_eq!(report.queries_used, 1);
        assert_eq!(report.transaction_volume, 12_500);
        assert_eq!(report.volume_remaining, Some(500_000 - 12_500));
        assert_eq!(report.linked_wallets, 1);
        assert_eq!(report.period, "2026-04");
    }
}
