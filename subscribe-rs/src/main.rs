mod config;
mod contracts;
mod report;

use anyhow::{anyhow, Context, Result};
use circles_sendcalls::calls::{self, Frequency, SubscriptionCategory, SubscriptionPlan};
use circles_sendcalls::encoding::{fmt_address, fmt_h256, parse_h256};
use circles_sendcalls::{
    BatchRequest, BatchResult, BatchSubmitter, Capability, EthersSigner, FallbackBundle,
};
use clap::{Args, Parser, Subcommand};
use config::{load_deployment, parse_addr, Deployment};
use contracts::{Hub, Safe, SubscriptionModule};
use ethers::prelude::*;
use ethers::utils::{format_units, parse_units};
use report::describe_failure;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

// Helper: with --json, stdout carries a single JSON object and every human-readable line goes to
// stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "circles-subscribe", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether the wallet answers wallet_getCapabilities.
    Capabilities(CapabilitiesArgs),

    /// Show module / hub approval state and subscriptions of a Safe.
    Status(StatusArgs),

    /// Enable the subscription module and subscribe, in one batch.
    Subscribe(SubscribeArgs),

    /// Cancel a subscription.
    Unsubscribe(UnsubscribeArgs),

    /// Redeem the due payment of a subscription.
    Redeem(RedeemArgs),

    /// Point a subscription at a new recipient.
    UpdateRecipient(UpdateRecipientArgs),

    /// Decode a bundle id produced by the sequential fallback.
    DecodeBundle(DecodeBundleArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (chain id, Hub and SubscriptionModule addresses).
    #[arg(long, default_value = "deployments/gnosis.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "CIRCLES_RPC_URL")]
    rpc: Option<String>,

    /// Signer private key.
    ///
    /// Recommended: set via env var CIRCLES_PRIVATE_KEY.
    #[arg(long, env = "CIRCLES_PRIVATE_KEY")]
    private_key: String,

    /// Print a single JSON object to stdout. All other output goes to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct SafeArgs {
    /// Safe (Circles avatar) that owns the subscriptions.
    ///
    /// Transactions are sent with this address as `from`. The signer key only signs locally for
    /// its own address, so the RPC endpoint must be able to send for the Safe (e.g. a wallet or
    /// relayer endpoint that controls it).
    #[arg(long, env = "CIRCLES_SAFE")]
    safe: String,
}

impl SafeArgs {
    fn address(&self) -> Result<Address> {
        parse_addr(&self.safe).context("invalid --safe address")
    }
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Fail instead of sending calls one by one when the wallet cannot batch them atomically.
    #[arg(long, default_value_t = false)]
    force_atomic: bool,

    /// Never fall back to individual eth_sendTransaction calls.
    #[arg(long, default_value_t = false)]
    no_fallback: bool,

    /// Pause between fallback transactions, in milliseconds.
    #[arg(long, default_value_t = 100)]
    fallback_delay_ms: u64,

    /// Caller-chosen bundle id forwarded to wallet_sendCalls.
    #[arg(long)]
    bundle_id: Option<String>,

    /// Request a wallet capability, as `name` (mandatory) or `name:optional`.
    ///
    /// Parameters are passed as JSON with `name={"url":"..."}` or `name:optional={...}`.
    #[arg(long = "capability", value_name = "NAME[:optional][=JSON]")]
    capabilities: Vec<String>,
}

#[derive(Args, Debug)]
struct CapabilitiesArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    safe: SafeArgs,
}

#[derive(Args, Debug)]
struct SubscribeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    safe: SafeArgs,

    #[command(flatten)]
    submit: SubmitArgs,

    /// Recipient of the subscription payments.
    #[arg(long)]
    recipient: String,

    /// Amount per period, in CRC (decimal string, e.g. "2.5").
    #[arg(long)]
    amount: String,

    /// hourly, daily, weekly, monthly, yearly, or a number of seconds.
    #[arg(long, default_value = "monthly")]
    frequency: String,

    /// trusted, untrusted or group.
    #[arg(long, default_value = "trusted")]
    category: String,

    /// Do not append Hub.setApprovalForAll(module, true) even if the module is not approved yet.
    #[arg(long, default_value_t = false)]
    skip_hub_approval: bool,
}

#[derive(Args, Debug)]
struct UnsubscribeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    safe: SafeArgs,

    #[command(flatten)]
    submit: SubmitArgs,

    /// Subscription id (bytes32 hex).
    #[arg(long)]
    id: String,
}

#[derive(Args, Debug)]
struct RedeemArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    submit: SubmitArgs,

    /// Subscription id (bytes32 hex).
    #[arg(long)]
    id: String,

    /// Extra redemption data (hex).
    #[arg(long, default_value = "0x")]
    data: String,

    /// Send from this account instead of the signer (the RPC endpoint must control it).
    #[arg(long)]
    from: Option<String>,
}

#[derive(Args, Debug)]
struct UpdateRecipientArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    submit: SubmitArgs,

    /// Subscription id (bytes32 hex).
    #[arg(long)]
    id: String,

    #[arg(long)]
    new_recipient: String,

    /// Send from this account instead of the signer (the RPC endpoint must control it).
    #[arg(long)]
    from: Option<String>,
}

#[derive(Args, Debug)]
struct DecodeBundleArgs {
    /// Bundle id returned by `subscribe` / `unsubscribe`.
    id: String,

    #[arg(long, default_value_t = false)]
    json: bool,
}

impl SubmitArgs {
    fn apply(&self, mut req: BatchRequest) -> Result<BatchRequest> {
        req = req
            .force_atomic(self.force_atomic)
            .fallback(!self.no_fallback)
            .fallback_delay(Duration::from_millis(self.fallback_delay_ms));
        if let Some(id) = self.bundle_id.as_ref() {
            req = req.with_id(id.clone());
        }
        for arg in &self.capabilities {
            let (name, cap) = parse_capability(arg)?;
            req = req.with_capability(name, cap);
        }
        Ok(req)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Capabilities(args) => cmd_capabilities(args).await,
        Command::Status(args) => cmd_status(args).await,
        Command::Subscribe(args) => cmd_subscribe(args).await,
        Command::Unsubscribe(args) => cmd_unsubscribe(args).await,
        Command::Redeem(args) => cmd_redeem(args).await,
        Command::UpdateRecipient(args) => cmd_update_recipient(args).await,
        Command::DecodeBundle(args) => cmd_decode_bundle(args),
    }
}

/// Loads the deployment, checks the RPC chain id against it and builds the signing client.
async fn connect(common: &CommonArgs) -> Result<(Deployment, Arc<Client>)> {
    let dep = load_deployment(&common.deployment, common.rpc.clone())?;

    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    let wallet = LocalWallet::from_str(&common.private_key)
        .context("invalid private key")?
        .with_chain_id(chain_id);
    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    Ok((dep, client))
}

async fn cmd_capabilities(args: CapabilitiesArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let account = client.address();

    let submitter = BatchSubmitter::new(EthersSigner::new(client));
    let supported = submitter.supports_atomic_batches(account).await;

    if machine_mode {
        let out = serde_json::json!({
            "chainId": dep.chain_id,
            "account": fmt_address(account),
            "atomicBatches": supported,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:        {}", dep.chain_id);
    outln!(machine_mode, "account:        {}", fmt_address(account));
    outln!(machine_mode, "atomicBatches:  {}", supported);
    Ok(())
}

async fn cmd_status(args: StatusArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let safe = args.safe.address()?;
    ensure_contract(client.as_ref(), safe).await?;

    let state = read_setup_state(client.clone(), &dep, safe).await;

    let module = SubscriptionModule::new(dep.subscription_module, client.clone());
    let ids = module
        .get_subscription_ids(safe)
        .call()
        .await
        .context("getSubscriptionIds failed")?;

    let mut subs = Vec::with_capacity(ids.len());
    for id in &ids {
        let (_subscriber, recipient, amount, last_redeemed, frequency, category) = module
            .get_subscription(*id)
            .call()
            .await
            .with_context(|| format!("getSubscription(0x{}) failed", hex::encode(id)))?;
        let redeemable = module
            .is_valid_or_redeemable(*id)
            .call()
            .await
            .with_context(|| format!("isValidOrRedeemable(0x{}) failed", hex::encode(id)))?;
        subs.push(serde_json::json!({
            "id": format!("0x{}", hex::encode(id)),
            "recipient": fmt_address(recipient),
            "amount": format_units(amount, dep.token_decimals)?,
            "frequency": frequency.as_u64(),
            "category": category,
            "lastRedeemed": last_redeemed.as_u64(),
            "validOrRedeemable": redeemable.to_string(),
        }));
    }

    if machine_mode {
        let out = serde_json::json!({
            "safe": fmt_address(safe),
            "moduleEnabled": state.module_enabled,
            "hubApproved": state.hub_approved,
            "subscriptions": subs,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "safe:           {}", fmt_address(safe));
    outln!(machine_mode, "module:         {}", fmt_address(dep.subscription_module));
    outln!(machine_mode, "moduleEnabled:  {}", state.module_enabled);
    outln!(machine_mode, "hubApproved:    {}", state.hub_approved);
    outln!(machine_mode, "subscriptions:  {}", subs.len());
    for sub in &subs {
        outln!(
            machine_mode,
            "  {} -> {} {} CRC every {}s (validOrRedeemable {})",
            sub["id"].as_str().unwrap_or_default(),
            sub["recipient"].as_str().unwrap_or_default(),
            sub["amount"].as_str().unwrap_or_default(),
            sub["frequency"],
            sub["validOrRedeemable"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_subscribe(args: SubscribeArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let safe = args.safe.address()?;
    ensure_contract(client.as_ref(), safe).await?;

    let state = read_setup_state(client.clone(), &dep, safe).await;
    let plan = subscription_plan(&args, &dep, safe, state)?;
    let batch = calls::subscription_batch(&plan)?;

    outln!(machine_mode, "safe:           {}", fmt_address(safe));
    outln!(machine_mode, "recipient:      {}", fmt_address(plan.recipient));
    outln!(machine_mode, "amount:         {} CRC", args.amount);
    outln!(machine_mode, "frequency:      {}", plan.frequency);
    outln!(machine_mode, "moduleEnabled:  {}", state.module_enabled);
    outln!(machine_mode, "calls:          {}", batch.len());

    let req = args
        .submit
        .apply(BatchRequest::new(batch).on_chain(dep.chain_id).from_account(safe))?;
    let res = submit(client, safe, req).await?;
    print_result(machine_mode, &res);
    Ok(())
}

async fn cmd_unsubscribe(args: UnsubscribeArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let safe = args.safe.address()?;
    ensure_contract(client.as_ref(), safe).await?;

    let id = parse_subscription_id(&args.id)?;
    let call = calls::unsubscribe(dep.subscription_module, id.to_fixed_bytes())?;

    outln!(machine_mode, "safe:           {}", fmt_address(safe));
    outln!(machine_mode, "subscription:   {}", fmt_h256(id));

    let req = args
        .submit
        .apply(BatchRequest::new(vec![call]).on_chain(dep.chain_id).from_account(safe))?;
    let res = submit(client, safe, req).await?;
    print_result(machine_mode, &res);
    Ok(())
}

async fn cmd_redeem(args: RedeemArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let from = sender(&client, args.from.as_deref())?;

    let id = parse_subscription_id(&args.id)?;
    let data = args
        .data
        .parse::<Bytes>()
        .map_err(|e| anyhow!("{e}"))
        .context("invalid --data")?;
    let call = calls::redeem(dep.subscription_module, id.to_fixed_bytes(), data)?;

    outln!(machine_mode, "from:           {}", fmt_address(from));
    outln!(machine_mode, "subscription:   {}", fmt_h256(id));

    let req = args
        .submit
        .apply(BatchRequest::new(vec![call]).on_chain(dep.chain_id).from_account(from))?;
    let res = submit(client, from, req).await?;
    print_result(machine_mode, &res);
    Ok(())
}

async fn cmd_update_recipient(args: UpdateRecipientArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client) = connect(&args.common).await?;
    let from = sender(&client, args.from.as_deref())?;

    let id = parse_subscription_id(&args.id)?;
    let new_recipient =
        parse_addr(&args.new_recipient).context("invalid --new-recipient address")?;
    let call = calls::update_recipient(dep.subscription_module, id.to_fixed_bytes(), new_recipient)?;

    outln!(machine_mode, "from:           {}", fmt_address(from));
    outln!(machine_mode, "subscription:   {}", fmt_h256(id));
    outln!(machine_mode, "newRecipient:   {}", fmt_address(new_recipient));

    let req = args
        .submit
        .apply(BatchRequest::new(vec![call]).on_chain(dep.chain_id).from_account(from))?;
    let res = submit(client, from, req).await?;
    print_result(machine_mode, &res);
    Ok(())
}

fn cmd_decode_bundle(args: DecodeBundleArgs) -> Result<()> {
    let bundle = FallbackBundle::decode(args.id.trim())
        .ok_or_else(|| anyhow!("not a fallback bundle id (wallet-issued ids are opaque)"))?;

    let hashes: Vec<String> = bundle.tx_hashes.iter().map(|h| fmt_h256(*h)).collect();
    if args.json {
        let out = serde_json::json!({
            "chainId": bundle.chain_id,
            "txHashes": hashes,
        });
        println!("{}", out);
        return Ok(());
    }

    println!("chainId:        {}", bundle.chain_id);
    for (i, h) in hashes.iter().enumerate() {
        println!("tx[{}]:          {}", i, h);
    }
    Ok(())
}

async fn submit(client: Arc<Client>, from: Address, req: BatchRequest) -> Result<BatchResult> {
    let submitter = BatchSubmitter::new(EthersSigner::new(client).with_address(from));
    match submitter.submit(req).await {
        Ok(res) => Ok(res),
        Err(e) => {
            let msg = describe_failure(&e);
            tracing::error!(kind = ?e.kind(), "batch submission failed");
            Err(anyhow::Error::new(e).context(msg))
        }
    }
}

fn print_result(machine_mode: bool, res: &BatchResult) {
    let path = if res.id.is_fallback() {
        "sequential"
    } else {
        "atomic"
    };

    if machine_mode {
        let mut out = serde_json::to_value(res).unwrap_or_default();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("path".to_string(), serde_json::Value::String(path.into()));
        }
        println!("{}", out);
    }

    outln!(machine_mode, "path:           {}", path);
    outln!(machine_mode, "bundleId:       {}", res.id);
    if let Some(hashes) = res.tx_hashes.as_ref() {
        for (i, h) in hashes.iter().enumerate() {
            outln!(machine_mode, "tx[{}]:          {}", i, fmt_h256(*h));
        }
    }
    if let Some(caps) = res.capabilities.as_ref() {
        outln!(machine_mode, "capabilities:   {}", caps);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct SetupState {
    module_enabled: bool,
    hub_approved: bool,
}

/// Module / Hub approval state of `safe`. A failed read counts as `false`, so the corresponding
/// call is included in the batch.
async fn read_setup_state(client: Arc<Client>, dep: &Deployment, safe: Address) -> SetupState {
    let safe_c = Safe::new(safe, client.clone());
    let hub = Hub::new(dep.hub, client);

    let enabled = safe_c.is_module_enabled(dep.subscription_module);
    let approved = hub.is_approved_for_all(safe, dep.subscription_module);
    let (enabled, approved) = tokio::join!(enabled.call(), approved.call());

    let module_enabled = enabled.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "isModuleEnabled read failed; assuming disabled");
        false
    });
    let hub_approved = approved.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "isApprovedForAll read failed; assuming not approved");
        false
    });
    SetupState {
        module_enabled,
        hub_approved,
    }
}

/// Fails unless `account` has contract code (a deployed Safe).
async fn ensure_contract(client: &Client, account: Address) -> Result<()> {
    let code = client
        .get_code(account, None)
        .await
        .context("eth_getCode failed")?;
    require_code(account, &code)
}

fn require_code(account: Address, code: &Bytes) -> Result<()> {
    if code.as_ref().is_empty() {
        return Err(anyhow!(
            "{} has no contract code; --safe must be a deployed Safe",
            fmt_address(account)
        ));
    }
    Ok(())
}

fn subscription_plan(
    args: &SubscribeArgs,
    dep: &Deployment,
    safe: Address,
    state: SetupState,
) -> Result<SubscriptionPlan> {
    let recipient = parse_addr(&args.recipient).context("invalid --recipient address")?;
    let frequency = Frequency::from_str(&args.frequency).map_err(|e| anyhow!(e))?;
    let category = SubscriptionCategory::from_str(&args.category).map_err(|e| anyhow!(e))?;
    let amount: U256 = parse_units(args.amount.as_str(), dep.token_decimals)
        .with_context(|| format!("invalid --amount {:?}", args.amount))?
        .into();
    if amount.is_zero() {
        return Err(anyhow!("--amount must be greater than zero"));
    }

    Ok(SubscriptionPlan {
        safe,
        module: dep.subscription_module,
        hub: dep.hub,
        recipient,
        amount,
        frequency,
        category,
        module_enabled: state.module_enabled,
        approve_hub: !state.hub_approved && !args.skip_hub_approval,
    })
}

fn sender(client: &Client, from: Option<&str>) -> Result<Address> {
    match from {
        Some(a) => parse_addr(a).context("invalid --from address"),
        None => Ok(client.address()),
    }
}

fn parse_subscription_id(s: &str) -> Result<H256> {
    parse_h256(s).map_err(|e| anyhow!(e)).context("invalid --id")
}

/// `name`, `name:optional`, optionally followed by `=<json object>` with capability parameters.
fn parse_capability(arg: &str) -> Result<(String, Capability)> {
    let (head, params) = match arg.split_once('=') {
        Some((head, json)) => {
            let v: serde_json::Value = serde_json::from_str(json)
                .with_context(|| format!("invalid capability parameters in {arg:?}"))?;
            let map = v
                .as_object()
                .cloned()
                .ok_or_else(|| anyhow!("capability parameters must be a JSON object: {arg:?}"))?;
            (head, map)
        }
        None => (arg, serde_json::Map::new()),
    };

    let (name, optional) = match head.split_once(':') {
        Some((name, "optional")) => (name, true),
        Some((_, other)) => return Err(anyhow!("unknown capability flag {other:?} in {arg:?}")),
        None => (head, false),
    };
    if name.is_empty() {
        return Err(anyhow!("empty capability name in {arg:?}"));
    }

    Ok((name.to_string(), Capability { optional, params }))
}
