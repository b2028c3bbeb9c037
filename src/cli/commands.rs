//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::time::Duration;
use tracing::{info, warn};

use crate::census::run_census;
use crate::chain::{Balance, ChainClient, SubstrateChain};
use crate::config::Config;
use crate::migration::{
    BatchDispatcher, CurrencyMigration, DispatchSettings, MemberMigration, MigrationCheck,
    MigrationScanner, PoolMigration, ProgressReporter, ScanOptions, ScanState,
};
use crate::wallet::{
    FundingReport, FundingSettings, Identity, MasterSecret, SignerFunding, SignerPool,
};

/// Flags shared by the migration jobs
#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    pub dry_run: bool,
    pub start_from: usize,
    pub first_seed: u32,
}

/// Everything a signing job needs once connected
struct Session {
    chain: SubstrateChain,
    admin: Identity,
    pool: SignerPool,
    existential_deposit: Balance,
}

impl Session {
    async fn open(config: &Config, first_seed: u32) -> Result<Self> {
        let secret = MasterSecret::from_env(&config.chain.mnemonic_env)?;
        let admin = secret.derive(None)?;
        let pool = SignerPool::derive(&secret, first_seed, config.signers.accounts_to_use)?;

        let chain = SubstrateChain::connect(&config.chain.endpoint)
            .await
            .context("Failed to connect to node")?;
        let existential_deposit = chain.existential_deposit().await?;
        warn_if_topup_below(
            Balance::from(config.signers.topup_balance),
            min_signer_balance(config, existential_deposit),
        );

        Ok(Self {
            chain,
            admin,
            pool,
            existential_deposit,
        })
    }

    fn dispatch_settings(&self, config: &Config) -> DispatchSettings {
        DispatchSettings {
            batch_size: config.dispatch.batch_size,
            delay: Duration::from_millis(config.dispatch.delay_ms),
            min_signer_balance: min_signer_balance(config, self.existential_deposit),
            flush_remainder: config.dispatch.flush_remainder,
        }
    }

    async fn print_banner(&self, config: &Config, job: &str, options: &JobOptions) -> Result<()> {
        let admin_balance = self.chain.account(self.admin.account()).await?.free;

        println!("\n=== {} ===\n", job);
        println!("Started: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
        println!("Admin: {} (balance {})", self.admin.address(), admin_balance);
        println!("Endpoint: {}", config.chain.endpoint);
        println!("Snapshot: {}", self.chain.snapshot());
        println!(
            "Runtime: spec version {}, genesis {:?}",
            self.chain.spec_version(),
            self.chain.genesis_hash()
        );
        println!("Existential deposit: {}", self.existential_deposit);
        println!(
            "Batch size: {}, delay: {}ms",
            config.dispatch.batch_size, config.dispatch.delay_ms
        );
        println!(
            "Signers: seeds {}..={} ({} accounts)",
            self.pool.first_seed(),
            self.pool.last_seed(),
            self.pool.len()
        );
        println!(
            "Final partial batch: {}",
            if config.dispatch.flush_remainder {
                "flushed"
            } else {
                "dropped"
            }
        );
        println!("Start from: {}", options.start_from);
        println!("Dry run: {}\n", options.dry_run);

        if options.dry_run {
            warn!("Running in DRY-RUN mode - no transactions will be submitted");
        }

        Ok(())
    }

    async fn fund_if_live(&self, config: &Config, options: &JobOptions) -> Result<()> {
        fund_if_live(
            &self.chain,
            &self.admin,
            &self.pool,
            FundingSettings::from(&config.signers),
            options.dry_run,
        )
        .await?;
        Ok(())
    }
}

/// Balance a signer needs before it may dispatch
fn min_signer_balance(config: &Config, existential_deposit: Balance) -> Balance {
    config
        .signers
        .min_dispatch_balance
        .map(Balance::from)
        .unwrap_or(existential_deposit)
}

/// Warn when top-ups cannot lift a signer over the dispatch minimum
fn warn_if_topup_below(topup: Balance, required: Balance) -> bool {
    if topup >= required {
        return false;
    }
    warn!(
        "topup_balance ({}) is below the minimum signer balance ({}); funded signers will still fail the dispatch check",
        topup, required
    );
    true
}

/// Top up the signer pool before a real run; dry runs move no funds
pub async fn fund_if_live<C: ChainClient + ?Sized>(
    chain: &C,
    admin: &Identity,
    pool: &SignerPool,
    settings: FundingSettings,
    dry_run: bool,
) -> Result<Option<FundingReport>> {
    if dry_run {
        info!("DRY-RUN: skipping signer funding");
        return Ok(None);
    }
    let funding = SignerFunding::new(chain, admin, settings);
    Ok(Some(funding.ensure_funded(pool).await?))
}

/// Scan each phase in order with one dispatcher
///
/// Every phase enumerates its own collection and ends with the dispatcher's
/// final-batch handling. The rotation counter carries across phases.
pub async fn run_phases<C: ChainClient + ?Sized>(
    chain: &C,
    checks: &[&dyn MigrationCheck],
    scanner: &MigrationScanner,
    dispatcher: &mut BatchDispatcher<'_, C>,
) -> Result<Vec<(&'static str, ScanState)>> {
    let mut results = Vec::with_capacity(checks.len());

    for check in checks {
        let keys = chain
            .keys(check.collection())
            .await
            .with_context(|| format!("Failed to enumerate {}", check.collection()))?;

        let state = scanner.scan(*check, &keys, dispatcher).await?;
        dispatcher.finish().await?;

        print_summary(check.name(), &state);
        results.push((check.name(), state));
    }

    Ok(results)
}

/// Migrate nomination pools, then their members
pub async fn migrate_pools(config: &Config, options: JobOptions) -> Result<()> {
    let session = Session::open(config, options.first_seed).await?;
    session
        .print_banner(config, "POOL MIGRATION", &options)
        .await?;
    session.fund_if_live(config, &options).await?;

    let pools = PoolMigration::new(&session.chain);
    let members = MemberMigration::new(&session.chain, session.existential_deposit);
    let scanner = scanner(config, &options);
    let mut dispatcher = BatchDispatcher::new(
        &session.chain,
        &session.pool,
        session.dispatch_settings(config),
    );

    run_phases(&session.chain, &[&pools, &members], &scanner, &mut dispatcher).await?;
    print_dispatch(&dispatcher);

    Ok(())
}

/// Migrate stakers off the legacy currency lock
pub async fn migrate_currency(config: &Config, options: JobOptions) -> Result<()> {
    let session = Session::open(config, options.first_seed).await?;
    session
        .print_banner(config, "CURRENCY MIGRATION", &options)
        .await?;
    session.fund_if_live(config, &options).await?;

    let stakers = CurrencyMigration::new(&session.chain);
    let scanner = scanner(config, &options);
    let mut dispatcher = BatchDispatcher::new(
        &session.chain,
        &session.pool,
        session.dispatch_settings(config),
    );

    run_phases(&session.chain, &[&stakers], &scanner, &mut dispatcher).await?;
    print_dispatch(&dispatcher);

    Ok(())
}

/// Top up the signer window from the admin account
pub async fn fund_signers(config: &Config, first_seed: u32) -> Result<()> {
    let session = Session::open(config, first_seed).await?;
    info!(
        "Funding {} signers from {}",
        session.pool.len(),
        session.admin.address()
    );

    let funding = SignerFunding::new(
        &session.chain,
        &session.admin,
        FundingSettings::from(&config.signers),
    );
    let report = funding.ensure_funded(&session.pool).await?;
    print_funding("FUNDING", &report);

    Ok(())
}

/// Sweep the signer window back to the admin account
pub async fn collect_signers(
    config: &Config,
    first_seed: u32,
    force: bool,
    dry_run: bool,
) -> Result<()> {
    let session = Session::open(config, first_seed).await?;

    // Confirmation prompt (unless --force or a dry run)
    if !force && !dry_run {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Sweep all funds of {} signers (seeds from {}) to {}? This reaps the signer accounts.",
                session.pool.len(),
                first_seed,
                session.admin.address()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Collect cancelled by user");
            return Ok(());
        }
    }

    let funding = SignerFunding::new(
        &session.chain,
        &session.admin,
        FundingSettings::from(&config.signers),
    );
    let report = funding.collect(&session.pool, dry_run).await?;
    print_funding("COLLECT", &report);

    Ok(())
}

/// Print provider/consumer reference histograms
pub async fn ref_census(config: &Config, json: bool) -> Result<()> {
    let chain = SubstrateChain::connect(&config.chain.endpoint)
        .await
        .context("Failed to connect to node")?;

    let census = run_census(&chain, config.progress.census_step).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&census)?);
    } else {
        println!("\n=== REFERENCE CENSUS at {} ===\n", chain.snapshot());
        println!("{}", census.render());
    }

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn scanner(config: &Config, options: &JobOptions) -> MigrationScanner {
    MigrationScanner::new(
        ScanOptions {
            dry_run: options.dry_run,
            start_from: options.start_from,
        },
        ProgressReporter::new(config.progress.step),
    )
}

fn print_summary(name: &str, state: &ScanState) {
    println!("\n=== {} SUMMARY ===\n", name.to_uppercase());
    println!("Processed: {}/{}", state.processed, state.total);
    println!("To migrate: {}", state.to_migrate);
    println!("Already migrated: {}", state.already_migrated);
    println!("Balance below ED: {}", state.balance_low);
    println!("Staking directly: {}", state.already_staking);
    println!("Pending slash: {}", state.pending_slash);
}

fn print_dispatch<C: ChainClient + ?Sized>(dispatcher: &BatchDispatcher<'_, C>) {
    let stats = dispatcher.stats();
    println!("\n=== DISPATCH ===\n");
    println!("Transactions: {}", stats.flushes);
    println!("Operations submitted: {}", stats.submitted_operations);
    println!("Failed transactions: {}", stats.failed_batches);
    if stats.dropped_operations > 0 {
        println!("Operations dropped: {}", stats.dropped_operations);
    }
}

fn print_funding(title: &str, report: &FundingReport) {
    println!("\n=== {} ===\n", title);
    println!("Signers checked: {}", report.checked);
    println!("Transfers: {}", report.transfers);
    println!("Total moved: {}", report.total);
}
