//! ordfw - ordered firewall policy store
//!
//! Command-line front end for the rule store. Every command goes through the same
//! request dispatcher an HTTP adapter would use; successful mutations are persisted
//! to the state file and recorded in the audit log.
//!
//! # Usage
//!
//! ```bash
//! ordfw policy list
//! ordfw policy add --source 10.0.0.0/8 --action drop --before 3
//! ordfw policy edit 4 --before 1            # move rule 4 to the top
//! ordfw nat add --egress wan0 --static 203.0.113.9
//! ordfw ipset set blocklist 198.51.100.0/24 203.0.113.7
//! ordfw export --output backup.json
//! ordfw import backup.json
//! ordfw config set --conntrack-exclude-port 8080
//! ordfw request GET /api/v1/policies
//! ```

use clap::{Args, Parser, Subcommand};
use ordfw::api::{Api, ApiRequest, ApiResponse, Method};
use ordfw::audit::{self, AuditLog};
use ordfw::client::{RuleClient, remote_error};
use ordfw::config::{self, AppConfig};
use ordfw::conntrack::ConntrackReader;
use ordfw::core::error::ErrorTranslation;
use ordfw::core::export::ConfigDocument;
use ordfw::core::ordered_list::ListSnapshot;
use ordfw::core::persist;
use ordfw::utils::ellipsize;
use ordfw::{Action, AddressSpec, Error, NatRule, NatTarget, Policy, Result, RuleId, RuleStore};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ordfw")]
#[command(about = "Ordered firewall policy and NAT rule store", long_about = None)]
struct Cli {
    /// State file to operate on (overrides the configured location)
    #[arg(long, global = true, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Config file to read instead of the default one
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage filtering policies
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Manage source NAT rules
    #[command(subcommand)]
    Nat(NatCommand),
    /// Manage named address sets
    #[command(subcommand)]
    Ipset(IpsetCommand),
    /// Write the whole configuration as a JSON document
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the whole configuration with a JSON document
    Import {
        file: PathBuf,
    },
    /// Show the connection tracking table
    Connections,
    /// List host network interfaces
    Interfaces,
    /// Show or change the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Send a raw request to the dispatcher
    Request {
        method: Method,
        /// Path with optional query, e.g. `/api/v1/policies?before=2`
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// List policies in evaluation order
    List,
    /// Create a policy
    Add {
        #[command(flatten)]
        fields: PolicyArgs,
        /// Insert before this rule (append if omitted)
        #[arg(long)]
        before: Option<RuleId>,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
    /// Change a policy, optionally moving it before another one
    Edit {
        id: RuleId,
        #[command(flatten)]
        fields: PolicyArgs,
        /// Move before this rule
        #[arg(long)]
        before: Option<RuleId>,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
    /// Delete a policy
    Delete {
        id: RuleId,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
}

#[derive(Subcommand)]
enum NatCommand {
    /// List NAT rules in evaluation order
    List,
    /// Create a NAT rule
    Add {
        #[command(flatten)]
        fields: NatArgs,
        /// Insert before this rule (append if omitted)
        #[arg(long)]
        before: Option<RuleId>,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
    /// Change a NAT rule, optionally moving it before another one
    Edit {
        id: RuleId,
        #[command(flatten)]
        fields: NatArgs,
        /// Move before this rule
        #[arg(long)]
        before: Option<RuleId>,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
    /// Delete a NAT rule
    Delete {
        id: RuleId,
        /// Fail unless the list is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },
}

/// Address arguments accept `any`, `set:<name>` or a comma separated list.
fn parse_address(value: &str) -> std::result::Result<AddressSpec, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("any") {
        return Ok(AddressSpec::Any);
    }
    if let Some(name) = value.strip_prefix("set:") {
        return Ok(AddressSpec::NamedSet(name.to_string()));
    }
    AddressSpec::parse_rendered_literal(value).map_err(|e| e.to_string())
}

#[derive(Args)]
struct PolicyArgs {
    #[arg(long, value_parser = parse_address)]
    source: Option<AddressSpec>,
    #[arg(long, value_parser = parse_address)]
    destination: Option<AddressSpec>,
    #[arg(long)]
    action: Option<Action>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    log: Option<bool>,
}

impl PolicyArgs {
    fn apply(self, mut policy: Policy) -> Policy {
        if let Some(source) = self.source {
            policy.source = source;
        }
        if let Some(destination) = self.destination {
            policy.destination = destination;
        }
        if let Some(action) = self.action {
            policy.action = action;
        }
        if let Some(name) = self.name {
            policy.name = name;
        }
        if let Some(description) = self.description {
            policy.description = description;
        }
        if let Some(log) = self.log {
            policy.log = log;
        }
        policy
    }
}

#[derive(Args)]
struct NatArgs {
    /// Egress interface
    #[arg(long)]
    egress: Option<String>,
    #[arg(long, value_parser = parse_address)]
    source: Option<AddressSpec>,
    #[arg(long, value_parser = parse_address)]
    destination: Option<AddressSpec>,
    /// Translate to this address instead of masquerading
    #[arg(long = "static", value_name = "ADDRESS", conflicts_with = "dynamic")]
    static_address: Option<IpAddr>,
    /// Masquerade with the egress interface address
    #[arg(long)]
    dynamic: bool,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    enabled: Option<bool>,
    #[arg(long)]
    log: Option<bool>,
}

impl NatArgs {
    fn apply(self, mut rule: NatRule) -> NatRule {
        if let Some(egress) = self.egress {
            rule.egress = egress;
        }
        if let Some(source) = self.source {
            rule.source = source;
        }
        if let Some(destination) = self.destination {
            rule.destination = destination;
        }
        if let Some(address) = self.static_address {
            rule.target = NatTarget::Static;
            rule.target_address = Some(address.to_string());
        } else if self.dynamic {
            rule.target = NatTarget::Dynamic;
            rule.target_address = None;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(log) = self.log {
            rule.log = log;
        }
        rule
    }
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Change settings and write the configuration file
    Set {
        #[arg(long, value_name = "FILE")]
        state_file: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        conntrack_path: Option<PathBuf>,
        /// Hide connections on this port (0 clears it)
        #[arg(long)]
        conntrack_exclude_port: Option<u16>,
        #[arg(long)]
        audit: Option<bool>,
        #[arg(long)]
        pretty_state: Option<bool>,
    },
}

#[derive(Subcommand)]
enum IpsetCommand {
    /// List address sets
    List,
    /// Create or replace an address set
    Set {
        name: String,
        /// Hosts, CIDR networks or `first-last` ranges
        #[arg(required = true)]
        members: Vec<String>,
    },
    /// Delete an address set (refused while rules reference it)
    Delete { name: String },
}

/// Store plus the side effects every CLI mutation carries
struct Session {
    api: Api,
    state_path: PathBuf,
    /// Held for the whole command so concurrent invocations never interleave
    _state_lock: persist::StateLock,
    audit: Option<AuditLog>,
    pretty_state: bool,
}

impl Session {
    async fn open(state_override: Option<PathBuf>, config: &AppConfig) -> Result<Self> {
        let state_path = match state_override.or_else(|| config.state_file.clone()) {
            Some(path) => path,
            None => persist::default_state_path()?,
        };

        let state_lock = persist::StateLock::acquire(&state_path).await?;
        let store = match persist::load_state(&state_path).await? {
            Some(state) => RuleStore::from_state(state)?,
            None => RuleStore::new(),
        };
        let conntrack = ConntrackReader::new(config.conntrack_path.clone())
            .excluding_port(config.conntrack_exclude_port);
        let audit = if config.audit_enabled {
            AuditLog::new().ok()
        } else {
            None
        };

        Ok(Self {
            api: Api::new(Arc::new(store)).with_conntrack(conntrack),
            state_path,
            _state_lock: state_lock,
            audit,
            pretty_state: config.pretty_state,
        })
    }

    fn client(&self) -> RuleClient<&Api> {
        RuleClient::new(&self.api)
    }

    /// Dispatches a request, auditing mutations and persisting successful ones.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.api.handle(&request);

        if let Some(audit) = &self.audit {
            audit::log_exchange(audit, &request, &response).await;
        }
        if request.method.is_mutation() && response.is_success() {
            let state = self.api.store().to_state()?;
            persist::save_state(&self.state_path, &state, self.pretty_state).await?;
        }
        Ok(response)
    }

    /// Like [`Self::execute`], but error responses become errors.
    async fn mutate(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.execute(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(remote_error(&response))
        }
    }
}

fn body_as<T: DeserializeOwned>(response: ApiResponse) -> Result<T> {
    let body = response
        .body
        .ok_or_else(|| Error::Internal("response has no body".to_string()))?;
    Ok(serde_json::from_value(body)?)
}

fn mutation_request(
    method: Method,
    target: &str,
    before: Option<RuleId>,
    expect_version: Option<u64>,
) -> ApiRequest {
    let mut request = ApiRequest::new(method, target);
    if let Some(before) = before {
        request = request.with_query("before", before);
    }
    if let Some(version) = expect_version {
        request = request.with_query("version", version);
    }
    request
}

fn print_policies(snapshot: &ListSnapshot<Policy>) {
    println!("Policies (version {}):", snapshot.version);
    if snapshot.rules.is_empty() {
        println!("  (none)");
    }
    for policy in &snapshot.rules {
        println!("  {policy}");
        if !policy.description.is_empty() {
            println!("        {}", ellipsize(&policy.description, 72));
        }
    }
}

fn print_nat(snapshot: &ListSnapshot<NatRule>) {
    println!("NAT rules (version {}):", snapshot.version);
    if snapshot.rules.is_empty() {
        println!("  (none)");
    }
    for rule in &snapshot.rules {
        println!("  {rule}");
        if !rule.description.is_empty() {
            println!("        {}", ellipsize(&rule.description, 72));
        }
    }
}

async fn handle_policy(session: &Session, command: PolicyCommand) -> Result<()> {
    match command {
        PolicyCommand::List => print_policies(&session.client().load::<Policy>()?),
        PolicyCommand::Add {
            fields,
            before,
            expect_version,
        } => {
            let policy = fields.apply(Policy::default());
            let request = mutation_request(Method::Post, "/policies", before, expect_version)
                .with_body(serde_json::to_value(&policy)?);
            let created: Policy = body_as(session.mutate(request).await?)?;
            println!("Created {created}");
        }
        PolicyCommand::Edit {
            id,
            fields,
            before,
            expect_version,
        } => {
            let current = session
                .client()
                .load::<Policy>()?
                .rules
                .into_iter()
                .find(|policy| policy.id == Some(id))
                .ok_or_else(|| Error::not_found("policy", id))?;
            let policy = fields.apply(current);
            let request =
                mutation_request(Method::Put, &format!("/policies/{id}"), before, expect_version)
                    .with_body(serde_json::to_value(&policy)?);
            let updated: Policy = body_as(session.mutate(request).await?)?;
            println!("Updated {updated}");
        }
        PolicyCommand::Delete { id, expect_version } => {
            let request =
                mutation_request(Method::Delete, &format!("/policies/{id}"), None, expect_version);
            session.mutate(request).await?;
            println!("Deleted policy {id}");
        }
    }
    Ok(())
}

async fn handle_nat(session: &Session, command: NatCommand) -> Result<()> {
    match command {
        NatCommand::List => print_nat(&session.client().load::<NatRule>()?),
        NatCommand::Add {
            fields,
            before,
            expect_version,
        } => {
            let rule = fields.apply(NatRule::default());
            let request = mutation_request(Method::Post, "/nat", before, expect_version)
                .with_body(serde_json::to_value(&rule)?);
            let created: NatRule = body_as(session.mutate(request).await?)?;
            println!("Created {created}");
        }
        NatCommand::Edit {
            id,
            fields,
            before,
            expect_version,
        } => {
            let current = session
                .client()
                .load::<NatRule>()?
                .rules
                .into_iter()
                .find(|rule| rule.id == Some(id))
                .ok_or_else(|| Error::not_found("nat rule", id))?;
            let rule = fields.apply(current);
            let request =
                mutation_request(Method::Put, &format!("/nat/{id}"), before, expect_version)
                    .with_body(serde_json::to_value(&rule)?);
            let updated: NatRule = body_as(session.mutate(request).await?)?;
            println!("Updated {updated}");
        }
        NatCommand::Delete { id, expect_version } => {
            let request =
                mutation_request(Method::Delete, &format!("/nat/{id}"), None, expect_version);
            session.mutate(request).await?;
            println!("Deleted nat rule {id}");
        }
    }
    Ok(())
}

async fn handle_ipset(session: &Session, command: IpsetCommand) -> Result<()> {
    match command {
        IpsetCommand::List => {
            let sets = session.client().address_sets()?;
            if sets.is_empty() {
                println!("No address sets.");
            }
            for set in sets {
                println!("{} ({} members)", set.name, set.members.len());
                for member in &set.members {
                    println!("  {member}");
                }
            }
        }
        IpsetCommand::Set { name, members } => {
            let request = ApiRequest::new(Method::Put, &format!("/ipsets/{name}"))
                .with_body(serde_json::to_value(&members)?);
            let set: ordfw::core::address_set::AddressSet =
                body_as(session.mutate(request).await?)?;
            println!("Stored address set '{}' ({} members)", set.name, set.members.len());
        }
        IpsetCommand::Delete { name } => {
            session
                .mutate(ApiRequest::new(Method::Delete, &format!("/ipsets/{name}")))
                .await?;
            println!("Deleted address set '{name}'");
        }
    }
    Ok(())
}

async fn handle_config(
    path: Option<PathBuf>,
    mut current: AppConfig,
    command: ConfigCommand,
) -> Result<()> {
    match command {
        ConfigCommand::Show => println!("{}", serde_json::to_string_pretty(&current)?),
        ConfigCommand::Set {
            state_file,
            conntrack_path,
            conntrack_exclude_port,
            audit,
            pretty_state,
        } => {
            let path = path
                .or_else(config::config_path)
                .ok_or(ordfw::core::error::PersistError::DataDirUnavailable)?;
            if state_file.is_some() {
                current.state_file = state_file;
            }
            if let Some(conntrack_path) = conntrack_path {
                current.conntrack_path = conntrack_path;
            }
            if let Some(port) = conntrack_exclude_port {
                current.conntrack_exclude_port = (port != 0).then_some(port);
            }
            if let Some(audit) = audit {
                current.audit_enabled = audit;
            }
            if let Some(pretty_state) = pretty_state {
                current.pretty_state = pretty_state;
            }
            config::save_config_to(&current, &path).await?;
            println!("Saved configuration to {}", path.display());
        }
    }
    Ok(())
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path).await,
        None => config::load_config().await,
    };
    let command = match cli.command {
        Commands::Config(command) => return handle_config(cli.config, config, command).await,
        command => command,
    };
    let session = Session::open(cli.state, &config).await?;

    match command {
        Commands::Policy(command) => handle_policy(&session, command).await?,
        Commands::Nat(command) => handle_nat(&session, command).await?,
        Commands::Ipset(command) => handle_ipset(&session, command).await?,
        Commands::Export { output } => {
            let json = session.client().export()?.to_pretty_json()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!("Exported configuration to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { file } => {
            let json = tokio::fs::read_to_string(&file).await?;
            let document = ConfigDocument::from_json(&json)?;
            let request =
                ApiRequest::new(Method::Post, "/import").with_body(serde_json::to_value(&document)?);
            let imported: ConfigDocument = body_as(session.mutate(request).await?)?;
            println!(
                "Imported {} policies, {} nat rules, {} address sets",
                imported.policies.len(),
                imported.nat.len(),
                imported.address_sets.len()
            );
        }
        Commands::Connections => {
            if !nix::unistd::getuid().is_root() {
                eprintln!("Note: Not running as root. The connection table may be unreadable.");
            }
            let snapshot = session.client().connections()?;
            println!(
                "{} connections at {}",
                snapshot.entries.len(),
                snapshot.taken_at.to_rfc3339()
            );
            for entry in snapshot.entries {
                println!("{entry}");
            }
        }
        Commands::Interfaces => {
            for name in session.client().interfaces()? {
                println!("{name}");
            }
        }
        // Runs before a session is opened
        Commands::Config(_) => {}
        Commands::Request { method, path, body } => {
            let mut request = ApiRequest::new(method, &path);
            if let Some(body) = body {
                let value = serde_json::from_str(&body)
                    .map_err(|e| Error::validation("body", e.to_string()))?;
                request = request.with_body(value);
            }
            let response = session.execute(request).await?;

            match response.version {
                Some(version) => println!("{} (version {version})", response.status),
                None => println!("{}", response.status),
            }
            if let Some(body) = &response.body {
                println!("{}", serde_json::to_string_pretty(body)?);
            }
            if !response.is_success() {
                return Err(remote_error(&response));
            }
        }
    }
    Ok(())
}

fn init_logging() {
    if let Some(mut log_path) = ordfw::utils::state_dir() {
        log_path.push("ordfw.log");
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let _ = ordfw::utils::ensure_dirs();
    init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let translation = ErrorTranslation::for_error(&e);
            eprintln!("Error: {}", translation.user_message);
            for suggestion in translation.suggestions {
                eprintln!("  hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}
