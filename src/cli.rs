// SPDX-License-Identifier: Apache-2.0

//! The `corim-store` command-line front-end.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Deserialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use uuid::Uuid;

use crate::error::Error;
use crate::migrations;
use crate::model;
use crate::store::{Config, Store};
use crate::token;

#[derive(Parser, Debug)]
#[command(name = "corim-store", version, about = "A queryable store for CoRIM manifests")]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database dialect (sqlite, postgres, mysql, ...).
    #[arg(long, global = true)]
    pub dbms: Option<String>,

    /// Driver-specific connection string.
    #[arg(long, global = true)]
    pub dsn: Option<String>,

    /// Manifest digest algorithm (md5, sha256, sha512).
    #[arg(long = "hash-alg", global = true)]
    pub hash_alg: Option<String>,

    /// Require a label when adding or looking up manifests.
    #[arg(long = "require-label", global = true)]
    pub require_label: bool,

    /// Allow ingesting signed CoRIMs without verifying their signatures.
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Allow potentially unsafe operations such as overwriting existing
    /// manifests.
    #[arg(long, global = true)]
    pub force: bool,

    /// Log SQL statements to stderr.
    #[arg(long = "trace-sql", global = true)]
    pub trace_sql: bool,

    /// Suppress ANSI color in output.
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Database management.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// CoRIM-related operations.
    Corim {
        #[command(subcommand)]
        command: CorimCommand,
    },
    /// List entries of a particular type: "manifests"/"corims",
    /// "modules"/"module-tags"/"comids", "entities", or "triples".
    List {
        what: String,

        #[command(flatten)]
        env: EnvArgs,

        /// Only list entries under this label.
        #[arg(short, long, default_value = "")]
        label: String,

        /// Match environments exactly, including null fields.
        #[arg(short, long)]
        exact: bool,
    },
    /// Get triples matching the specified environment.
    Get {
        #[command(flatten)]
        env: EnvArgs,

        /// Look up reference values.
        #[arg(short = 'R', long = "reference-values")]
        reference_values: bool,

        /// Look up endorsements.
        #[arg(short = 'E', long)]
        endorsements: bool,

        /// Look up trust anchors.
        #[arg(short = 'T', long = "trust-anchors")]
        trust_anchors: bool,

        /// Only match triples under this label.
        #[arg(short, long, default_value = "")]
        label: String,

        /// Match environments exactly, including null fields.
        #[arg(short, long)]
        exact: bool,
    },
    /// Activate a (set of) triple(s), making them available to the
    /// verifier.
    Activate {
        #[command(flatten)]
        targets: ActivateArgs,
    },
    /// Deactivate a (set of) triple(s), making them unavailable to the
    /// verifier.
    Deactivate {
        #[command(flatten)]
        targets: ActivateArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Create the store's tables in a new database.
    Init,
    /// Apply pending schema migrations.
    Migrate,
    /// Revert the most recent migration group.
    Rollback,
    /// Report applied and pending migrations.
    Status,
    /// Print the schema for the configured dialect.
    Schema,
}

#[derive(Subcommand, Debug)]
pub enum CorimCommand {
    /// Add a CoRIM's contents to the store.
    Add {
        paths: Vec<PathBuf>,

        /// Label that will be applied to the manifest in the store.
        #[arg(short, long, default_value = "")]
        label: String,

        /// Activate added triples.
        #[arg(short, long)]
        activate: bool,
    },
    /// Delete data associated with the specified CoRIM or manifest ID.
    Delete {
        targets: Vec<String>,

        /// Label of the manifest in the store.
        #[arg(short, long, default_value = "")]
        label: String,

        /// Force interpretation of the positional argument as a path to a
        /// CoRIM.
        #[arg(short = 'C', long)]
        corim: bool,
    },
    /// Write a CoRIM containing data associated with the specified
    /// manifest ID.
    Dump {
        manifest_id: String,

        /// Label of the manifest in the store.
        #[arg(short, long, default_value = "")]
        label: String,

        /// Output path to which the CoRIM will be written.
        #[arg(short, long, default_value = "store-corim.cbor")]
        output: PathBuf,
    },
}

/// Environment probe fields shared by `list` and `get`.
#[derive(Args, Debug, Default)]
pub struct EnvArgs {
    /// Environment class ID (uuid:, oid:, hex: or base64).
    #[arg(short = 'C', long = "class-id", default_value = "")]
    pub class_id: String,

    /// Environment vendor.
    #[arg(short = 'V', long, default_value = "")]
    pub vendor: String,

    /// Environment model.
    #[arg(short = 'M', long, default_value = "")]
    pub model: String,

    /// Environment layer.
    #[arg(short = 'L', long, default_value_t = -1)]
    pub layer: i64,

    /// Environment index.
    #[arg(short = 'I', long, default_value_t = -1)]
    pub index: i64,

    /// Environment instance ID (uuid:, oid:, hex: or base64).
    #[arg(short = 'i', long = "instance-id", default_value = "")]
    pub instance_id: String,

    /// Environment group ID (uuid:, oid:, hex: or base64).
    #[arg(short = 'g', long = "group-id", default_value = "")]
    pub group_id: String,
}

#[derive(Args, Debug, Default)]
pub struct ActivateArgs {
    /// Key triple database ID.
    #[arg(long = "key-triple")]
    pub key_triple: Vec<i64>,

    /// Value triple database ID.
    #[arg(long = "value-triple")]
    pub value_triple: Vec<i64>,

    /// Module tag ID.
    #[arg(long = "module-tag")]
    pub module_tag: Vec<String>,

    /// Manifest ID.
    #[arg(long)]
    pub manifest: Vec<String>,
}

/// Configuration merged from the YAML file, `CORIM_STORE_*` environment
/// variables and command-line flags (in increasing precedence).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct CliConfig {
    pub dbms: Option<String>,
    pub dsn: Option<String>,
    pub hash_alg: Option<String>,
    pub require_label: bool,
    pub insecure: bool,
    pub force: bool,
    pub trace_sql: bool,
    pub no_color: bool,
}

impl CliConfig {
    /// Load the configuration file, if one exists, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<CliConfig, Error> {
        let mut ret = match Self::config_file(path) {
            Some(file) => {
                let text = std::fs::read_to_string(&file).map_err(|e| {
                    Error::Configuration(format!("could not read {}: {e}", file.display()))
                })?;
                serde_yaml::from_str(&text).map_err(|e| {
                    Error::Configuration(format!("could not parse {}: {e}", file.display()))
                })?
            }
            None => CliConfig::default(),
        };

        ret.apply_env();

        Ok(ret)
    }

    fn config_file(path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = path {
            return Some(path.to_path_buf());
        }

        let name = "corim-store.yaml";

        let cwd_file = PathBuf::from(name);
        if cwd_file.exists() {
            return Some(cwd_file);
        }

        if let Some(config_dir) = dirs_config_dir() {
            let file = config_dir.join(name);
            if file.exists() {
                return Some(file);
            }
        }

        None
    }

    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("CORIM_STORE_DBMS") {
            self.dbms = Some(val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_DSN") {
            self.dsn = Some(val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_HASH_ALG") {
            self.hash_alg = Some(val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_REQUIRE_LABEL") {
            self.require_label = env_bool(&val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_INSECURE") {
            self.insecure = env_bool(&val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_FORCE") {
            self.force = env_bool(&val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_TRACE_SQL") {
            self.trace_sql = env_bool(&val);
        }
        if let Ok(val) = std::env::var("CORIM_STORE_NO_COLOR") {
            self.no_color = env_bool(&val);
        }
    }

    /// Fold the command-line flags over the loaded configuration.
    pub fn apply_flags(&mut self, cli: &Cli) {
        if let Some(dbms) = &cli.dbms {
            self.dbms = Some(dbms.clone());
        }
        if let Some(dsn) = &cli.dsn {
            self.dsn = Some(dsn.clone());
        }
        if let Some(hash_alg) = &cli.hash_alg {
            self.hash_alg = Some(hash_alg.clone());
        }
        self.require_label |= cli.require_label;
        self.insecure |= cli.insecure;
        self.force |= cli.force;
        self.trace_sql |= cli.trace_sql;
        self.no_color |= cli.no_color;
    }

    pub fn store_config(&self) -> Config {
        let mut cfg = Config::default();

        if let Some(dbms) = &self.dbms {
            cfg.dbms = dbms.clone();
        }
        if let Some(dsn) = &self.dsn {
            cfg.dsn = dsn.clone();
        }
        if let Some(hash_alg) = &self.hash_alg {
            cfg.hash_alg = hash_alg.clone();
        }
        cfg.require_label = self.require_label;
        cfg.insecure = self.insecure;
        cfg.force = self.force;
        cfg.trace_sql = self.trace_sql;

        cfg
    }
}

fn env_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn dirs_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir));
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config"))
}

/// Run the parsed command. Returns the process exit code.
pub async fn run(cli: Cli) -> Result<(), Error> {
    let mut config = CliConfig::load(cli.config.as_deref())?;
    config.apply_flags(&cli);

    match &cli.command {
        Command::Db { command } => run_db_command(&config, command).await,
        Command::Corim { command } => run_corim_command(&config, command).await,
        Command::List {
            what,
            env,
            label,
            exact,
        } => run_list_command(&config, what, env, label, *exact).await,
        Command::Get {
            env,
            reference_values,
            endorsements,
            trust_anchors,
            label,
            exact,
        } => {
            run_get_command(
                &config,
                env,
                Selector::new(*reference_values, *endorsements, *trust_anchors),
                label,
                *exact,
            )
            .await
        }
        Command::Activate { targets } => run_set_active_command(&config, targets, true).await,
        Command::Deactivate { targets } => run_set_active_command(&config, targets, false).await,
    }
}

async fn run_db_command(config: &CliConfig, command: &DbCommand) -> Result<(), Error> {
    if let DbCommand::Schema = command {
        // rendering the schema needs no database connection
        let dialect =
            crate::db::Dialect::from_dbms(config.dbms.as_deref().unwrap_or("sqlite"))?;

        for statement in migrations::initial_up(dialect) {
            println!("{statement};");
        }

        return Ok(());
    }

    let store = Store::open(config.store_config()).await?;

    match command {
        DbCommand::Init => {
            store.init().await?;
            print_ok(config.no_color);
        }
        DbCommand::Migrate => {
            let applied = store.migrate().await?;
            println!("applied {applied} migration(s)");
            print_ok(config.no_color);
        }
        DbCommand::Rollback => {
            let reverted = store.rollback().await?;
            println!("reverted {reverted} migration(s)");
            print_ok(config.no_color);
        }
        DbCommand::Status => {
            for (name, applied) in store.migration_status().await? {
                let state = if applied { "applied" } else { "pending" };
                println!("{name}\t{state}");
            }
        }
        DbCommand::Schema => (),
    }

    store.close().await;

    Ok(())
}

async fn run_corim_command(config: &CliConfig, command: &CorimCommand) -> Result<(), Error> {
    let store = Store::open(config.store_config()).await?;

    match command {
        CorimCommand::Add {
            paths,
            label,
            activate,
        } => {
            for path in paths {
                let bytes = std::fs::read(path).map_err(|e| {
                    Error::Configuration(format!("error reading {}: {e}", path.display()))
                })?;

                store.add_bytes(&bytes, label, *activate).await.map_err(|e| {
                    Error::Validation(format!("error adding {}: {e}", path.display()))
                })?;

                println!("added {}", path.display());
            }

            print_ok(config.no_color);
        }
        CorimCommand::Delete {
            targets,
            label,
            corim,
        } => {
            for target in targets {
                println!("Deleting {target}...");

                let manifest_id = if Path::new(target).exists() {
                    let buf = std::fs::read(target).map_err(|e| {
                        Error::Configuration(format!("could not read {target}: {e}"))
                    })?;

                    extract_manifest_id(&buf)?
                } else if *corim {
                    return Err(Error::Configuration(format!(
                        "could not read CoRIM from {target:?}: does not exist"
                    )));
                } else {
                    target.clone()
                };

                store.delete_manifest(&manifest_id, label).await?;
            }

            print_ok(config.no_color);
        }
        CorimCommand::Dump {
            manifest_id,
            label,
            output,
        } => {
            if output.exists() && !config.force {
                return Err(Error::Configuration(format!(
                    "output file exists: {} (use --force to overwrite)",
                    output.display()
                )));
            }

            let manifest = store.get_manifest(manifest_id, label).await?;

            let corim = manifest
                .to_token()
                .map_err(|e| Error::Validation(format!("could not convert manifest: {e}")))?;

            let bytes = corim.to_cbor()?;

            std::fs::write(output, bytes).map_err(|e| {
                Error::Configuration(format!("could not write output: {e}"))
            })?;

            print_ok(config.no_color);
        }
    }

    store.close().await;

    Ok(())
}

fn extract_manifest_id(buf: &[u8]) -> Result<String, Error> {
    let corim = match token::detect_envelope(buf)? {
        token::Envelope::Signed => {
            let payload = token::unwrap_cose_sign1(buf)?;
            token::UnsignedCorim::from_cbor_payload(&payload)?
        }
        token::Envelope::Unsigned => token::UnsignedCorim::from_cbor(buf)?,
    };

    Ok(corim.id.to_string())
}

struct Selector {
    reference_values: bool,
    endorsements: bool,
    trust_anchors: bool,
}

impl Selector {
    fn new(reference_values: bool, endorsements: bool, trust_anchors: bool) -> Selector {
        // if no category is explicitly selected, look up all of them
        if !reference_values && !endorsements && !trust_anchors {
            return Selector {
                reference_values: true,
                endorsements: true,
                trust_anchors: true,
            };
        }

        Selector {
            reference_values,
            endorsements,
            trust_anchors,
        }
    }
}

async fn run_get_command(
    config: &CliConfig,
    env_args: &EnvArgs,
    selector: Selector,
    label: &str,
    exact: bool,
) -> Result<(), Error> {
    let probe = build_probe(env_args)?;

    if probe.is_empty() {
        return Err(Error::Configuration(
            "at least one environment field specifier must be provided (see --help)".to_string(),
        ));
    }

    let store = Store::open(config.store_config()).await?;

    let mut result = token::Triples::default();

    if selector.endorsements || selector.reference_values {
        match store.get_value_triples_matching(&probe, label, exact).await {
            Ok(found) => {
                if selector.reference_values {
                    result.reference_values =
                        model::value_triples_to_token(&found, model::REFERENCE_VALUE_TRIPLE)?;
                }
                if selector.endorsements {
                    result.endorsed_values =
                        model::value_triples_to_token(&found, model::ENDORSED_VALUE_TRIPLE)?;
                }
            }
            Err(Error::NoMatch) => (),
            Err(e) => return Err(e),
        }
    }

    if selector.trust_anchors {
        match store.get_key_triples_matching(&probe, label, exact).await {
            Ok(found) => {
                result.attest_verif_keys =
                    model::key_triples_to_token(&found, model::ATTEST_KEY_TRIPLE)?;
            }
            Err(Error::NoMatch) => (),
            Err(e) => return Err(e),
        }
    }

    let json = serde_json::to_string_pretty(&result)
        .map_err(|e| Error::Validation(format!("could not format result: {e}")))?;

    println!("{json}");

    store.close().await;

    Ok(())
}

async fn run_list_command(
    config: &CliConfig,
    what: &str,
    env_args: &EnvArgs,
    label: &str,
    exact: bool,
) -> Result<(), Error> {
    let what = normalize(what);
    let probe = build_probe(env_args)?;

    if what != "triples" && !probe.is_empty() {
        return Err(Error::Configuration(
            "environment specifiers are only allowed for triples".to_string(),
        ));
    }

    let store = Store::open(config.store_config()).await?;

    let (header, rows) = match what.as_str() {
        "manifests" | "corims" => list_manifests(&store).await?,
        "modules" | "module_tags" | "comids" => list_module_tags(&store).await?,
        "entities" => list_entities(&store).await?,
        "triples" => list_triples(&store, &probe, label, exact).await?,
        other => {
            return Err(Error::Configuration(format!(
                "unsupported list target: {other}"
            )))
        }
    };

    let mut builder = Builder::default();
    builder.push_record(header);
    for row in rows {
        builder.push_record(row);
    }

    let mut table = builder.build();
    table.with(Style::sharp());

    println!("{table}");

    store.close().await;

    Ok(())
}

async fn list_manifests(store: &Store) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
    let db = store.db();
    let entities_agg = store.string_aggregator_expr("ent.name");
    let digest_hex = store.hex_expr("man.digest");

    let sql = format!(
        "SELECT man.label AS label, man.manifest_id AS manifest_id, man.profile AS profile, \
         {entities_agg} AS entities, man.not_before AS not_before, \
         man.not_after AS not_after, {digest_hex} AS digest, man.time_added AS time_added \
         FROM manifests AS man \
         LEFT JOIN entities AS ent ON ent.owner_id = man.id AND ent.owner_type = 'manifest' \
         GROUP BY man.id, man.label, man.manifest_id, man.profile, man.not_before, \
         man.not_after, man.digest, man.time_added \
         ORDER BY man.id"
    );

    let mut conn = db.acquire().await?;
    let rows = db.fetch_all(&mut conn, &sql, vec![]).await?;

    let header = vec![
        "label".to_string(),
        "manifest_id".to_string(),
        "profile".to_string(),
        "entities".to_string(),
        "not_before".to_string(),
        "not_after".to_string(),
        "digest".to_string(),
        "time_added".to_string(),
    ];

    let mut ret = Vec::with_capacity(rows.len());
    for row in &rows {
        ret.push(vec![
            opt_text(row, "label")?,
            text(row, "manifest_id")?,
            opt_text(row, "profile")?,
            opt_text(row, "entities")?,
            opt_time(row, "not_before")?,
            opt_time(row, "not_after")?,
            opt_text(row, "digest")?,
            opt_time(row, "time_added")?,
        ]);
    }

    Ok((header, ret))
}

async fn list_module_tags(store: &Store) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
    let db = store.db();
    let entities_agg = store.string_aggregator_expr("ent.name");

    let sql = format!(
        "SELECT mt.tag_id AS tag_id, mt.language AS language, {entities_agg} AS entities, \
         man.manifest_id AS manifest, man.label AS label \
         FROM module_tags AS mt \
         LEFT JOIN entities AS ent ON ent.owner_id = mt.id AND ent.owner_type = 'module_tag' \
         LEFT JOIN manifests AS man ON man.id = mt.manifest_id \
         GROUP BY mt.id, mt.tag_id, mt.language, man.manifest_id, man.label \
         ORDER BY mt.id"
    );

    let mut conn = db.acquire().await?;
    let rows = db.fetch_all(&mut conn, &sql, vec![]).await?;

    let header = vec![
        "tag_id".to_string(),
        "language".to_string(),
        "entities".to_string(),
        "manifest".to_string(),
        "label".to_string(),
    ];

    let mut ret = Vec::with_capacity(rows.len());
    for row in &rows {
        ret.push(vec![
            text(row, "tag_id")?,
            opt_text(row, "language")?,
            opt_text(row, "entities")?,
            opt_text(row, "manifest")?,
            opt_text(row, "label")?,
        ]);
    }

    Ok((header, ret))
}

async fn list_entities(store: &Store) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
    let db = store.db();
    let owner_expr = store.concat_expr(&["ent.owner_type", "'('", "ent.owner_id", "')'"]);
    let roles_agg = store.string_aggregator_expr("r.role");

    let sql = format!(
        "SELECT ent.name AS name, ent.uri AS uri, {owner_expr} AS owner, \
         {roles_agg} AS roles \
         FROM entities AS ent \
         LEFT JOIN roles AS r ON r.entity_id = ent.id \
         GROUP BY ent.id, ent.name, ent.uri, ent.owner_type, ent.owner_id \
         ORDER BY ent.id"
    );

    let mut conn = db.acquire().await?;
    let rows = db.fetch_all(&mut conn, &sql, vec![]).await?;

    let header = vec![
        "name".to_string(),
        "uri".to_string(),
        "owner".to_string(),
        "roles".to_string(),
    ];

    let mut ret = Vec::with_capacity(rows.len());
    for row in &rows {
        ret.push(vec![
            text(row, "name")?,
            opt_text(row, "uri")?,
            opt_text(row, "owner")?,
            opt_text(row, "roles")?,
        ]);
    }

    Ok((header, ret))
}

async fn list_triples(
    store: &Store,
    probe: &model::Environment,
    label: &str,
    exact: bool,
) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
    let db = store.db();

    let sql = "SELECT mt.id AS id, mt.tag_id AS module, man.manifest_id AS manifest, \
               man.label AS label FROM module_tags AS mt \
               LEFT JOIN manifests AS man ON man.id = mt.manifest_id";

    let mut conn = db.acquire().await?;
    let rows = db.fetch_all(&mut conn, sql, vec![]).await?;
    drop(conn);

    let mut lookup = std::collections::HashMap::new();
    for row in &rows {
        let id: i64 = sqlx::Row::try_get(row, "id")?;
        lookup.insert(
            id,
            (
                opt_text(row, "label")?,
                opt_text(row, "manifest")?,
                text(row, "module")?,
            ),
        );
    }

    let key_triples = match store.get_key_triples_matching(probe, label, exact).await {
        Ok(found) => found,
        Err(Error::NoMatch) => Vec::new(),
        Err(e) => return Err(Error::Validation(format!("getting key triples: {e}"))),
    };

    let value_triples = match store.get_value_triples_matching(probe, label, exact).await {
        Ok(found) => found,
        Err(Error::NoMatch) => Vec::new(),
        Err(e) => return Err(Error::Validation(format!("getting value triples: {e}"))),
    };

    let header = vec![
        "id".to_string(),
        "active".to_string(),
        "label".to_string(),
        "manifest".to_string(),
        "module".to_string(),
        "type".to_string(),
        "environment".to_string(),
    ];

    let mut ret = Vec::with_capacity(key_triples.len() + value_triples.len());

    for triple in &key_triples {
        let (label, manifest, module) = lookup
            .get(&triple.module_id)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("orphan key triple: {}", triple.id)))?;

        ret.push(vec![
            triple.id.to_string(),
            triple.is_active.to_string(),
            label,
            manifest,
            module,
            format!("{} key", triple.triple_type),
            render_environment(triple.environment.as_ref())?,
        ]);
    }

    for triple in &value_triples {
        let (label, manifest, module) = lookup
            .get(&triple.module_id)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("orphan value triple: {}", triple.id)))?;

        ret.push(vec![
            triple.id.to_string(),
            triple.is_active.to_string(),
            label,
            manifest,
            module,
            format!("{} value", triple.triple_type),
            render_environment(triple.environment.as_ref())?,
        ]);
    }

    Ok((header, ret))
}

fn render_environment(env: Option<&model::Environment>) -> Result<String, Error> {
    let env = match env {
        Some(env) => env,
        None => return Ok(String::new()),
    };

    let parts = env
        .render_parts()?
        .into_iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>();

    Ok(parts.join(", "))
}

async fn run_set_active_command(
    config: &CliConfig,
    targets: &ActivateArgs,
    value: bool,
) -> Result<(), Error> {
    let store = Store::open(config.store_config()).await?;

    if !targets.key_triple.is_empty() {
        store
            .set_key_triples_active(&targets.key_triple, value)
            .await
            .map_err(|e| Error::Validation(format!("key triples: {e}")))?;
    }

    if !targets.value_triple.is_empty() {
        store
            .set_value_triples_active(&targets.value_triple, value)
            .await
            .map_err(|e| Error::Validation(format!("value triples: {e}")))?;
    }

    if !targets.module_tag.is_empty() {
        let mut module_ids = Vec::new();
        for tag_id in &targets.module_tag {
            module_ids.extend(store.find_module_tag_ids(tag_id).await?);
        }

        store
            .set_module_tags_active(&module_ids, value)
            .await
            .map_err(|e| Error::Validation(format!("module tags: {e}")))?;
    }

    if !targets.manifest.is_empty() {
        store
            .set_manifests_active(&targets.manifest, value)
            .await
            .map_err(|e| Error::Validation(format!("manifests: {e}")))?;
    }

    print_ok(config.no_color);

    store.close().await;

    Ok(())
}

/// Build an environment probe from command-line id/field specifiers.
pub fn build_probe(args: &EnvArgs) -> Result<model::Environment, Error> {
    let mut ret = model::Environment::default();

    if !args.vendor.is_empty() {
        ret.vendor = Some(args.vendor.clone());
    }

    if !args.model.is_empty() {
        ret.model = Some(args.model.clone());
    }

    if args.layer > -1 {
        ret.layer = Some(args.layer);
    }

    if args.index > -1 {
        ret.index = Some(args.index);
    }

    if !args.class_id.is_empty() {
        let (bytes, id_type) = parse_id(&args.class_id)
            .map_err(|e| Error::Validation(format!("class-id: {e}")))?;
        ret.class_bytes = Some(bytes);
        if !id_type.is_empty() {
            ret.class_type = Some(id_type);
        }
    }

    if !args.instance_id.is_empty() {
        let (bytes, id_type) = parse_id(&args.instance_id)
            .map_err(|e| Error::Validation(format!("instance-id: {e}")))?;
        ret.instance_bytes = Some(bytes);
        if !id_type.is_empty() {
            ret.instance_type = Some(id_type);
        }
    }

    if !args.group_id.is_empty() {
        let (bytes, id_type) = parse_id(&args.group_id)
            .map_err(|e| Error::Validation(format!("group-id: {e}")))?;
        ret.group_bytes = Some(bytes);
        if !id_type.is_empty() {
            ret.group_type = Some(id_type);
        }
    }

    Ok(ret)
}

/// Parse an environment id specifier. A `uuid:`, `oid:` or `hex:` prefix
/// selects the type; anything else is taken as base64-encoded bytes with
/// no type constraint.
pub fn parse_id(text: &str) -> Result<(Vec<u8>, String), Error> {
    let (type_text, value_text) = match text.split_once(':') {
        Some((t, v)) if matches!(t, "uuid" | "oid" | "hex") => (t, v),
        _ => ("", text),
    };

    match type_text {
        "uuid" => {
            let uuid = Uuid::parse_str(value_text)
                .map_err(|e| Error::invalid("UUID", e.to_string()))?;
            Ok((uuid.as_bytes().to_vec(), "uuid".to_string()))
        }
        "oid" => Ok((token::encode_oid(value_text)?, "oid".to_string())),
        "hex" => {
            let bytes = hex::decode(value_text)
                .map_err(|e| Error::invalid("hex value", e.to_string()))?;
            Ok((bytes, String::new()))
        }
        _ => {
            // assume base64: drop padding, convert URL-safe to standard
            let value_text = value_text
                .trim_end_matches('=')
                .replace('-', "+")
                .replace('_', "/");

            let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
                .decode(value_text)
                .map_err(|e| Error::invalid("base64 value", e.to_string()))?;

            Ok((bytes, String::new()))
        }
    }
}

/// Normalize a list target name.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('-', "_")
}

fn print_ok(no_color: bool) {
    if no_color {
        println!("ok");
    } else {
        println!("{}", "ok".green());
    }
}

fn text(row: &sqlx::any::AnyRow, column: &str) -> Result<String, Error> {
    Ok(sqlx::Row::try_get::<String, _>(row, column)?)
}

fn opt_text(row: &sqlx::any::AnyRow, column: &str) -> Result<String, Error> {
    Ok(sqlx::Row::try_get::<Option<String>, _>(row, column)?.unwrap_or_default())
}

fn opt_time(row: &sqlx::any::AnyRow, column: &str) -> Result<String, Error> {
    let secs = sqlx::Row::try_get::<Option<i64>, _>(row, column)?;

    Ok(match secs {
        Some(secs) => match Utc.timestamp_opt(secs, 0).single() {
            Some(time) => time.to_rfc3339(),
            None => secs.to_string(),
        },
        None => String::new(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_id_forms() {
        let (bytes, id_type) =
            parse_id("uuid:31fb5abf-023e-4992-aa4e-95f9c1503bfa").unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(id_type, "uuid");

        let (bytes, id_type) = parse_id("oid:2.5.4.3").unwrap();
        assert_eq!(bytes, vec![0x55, 0x04, 0x03]);
        assert_eq!(id_type, "oid");

        let (bytes, id_type) = parse_id("hex:deadbeef").unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id_type, "");

        // URL-safe base64 with padding
        let (bytes, id_type) = parse_id("3q2-7w==").unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id_type, "");

        assert!(parse_id("uuid:not-a-uuid").is_err());
        assert!(parse_id("hex:xyz").is_err());
    }

    #[test]
    fn normalize_names() {
        assert_eq!(normalize("  Module-Tags "), "module_tags");
        assert_eq!(normalize("corims"), "corims");
    }

    #[test]
    fn probe_building() {
        let args = EnvArgs {
            vendor: "acme".to_string(),
            layer: 0,
            index: -1,
            instance_id: "hex:0102".to_string(),
            ..Default::default()
        };

        let probe = build_probe(&args).unwrap();
        assert_eq!(probe.vendor.as_deref(), Some("acme"));
        assert_eq!(probe.layer, Some(0));
        assert_eq!(probe.index, None);
        assert_eq!(probe.instance_bytes.as_deref(), Some(&[0x01, 0x02][..]));
        assert_eq!(probe.instance_type, None);

        assert!(build_probe(&EnvArgs::default()).unwrap().is_empty());
    }

    #[test]
    fn selector_defaults_to_all() {
        let selector = Selector::new(false, false, false);
        assert!(selector.reference_values && selector.endorsements && selector.trust_anchors);

        let selector = Selector::new(true, false, false);
        assert!(selector.reference_values);
        assert!(!selector.trust_anchors);
    }

    #[test]
    fn config_precedence() {
        let mut config = CliConfig {
            dbms: Some("sqlite".to_string()),
            ..Default::default()
        };

        let cli = Cli::parse_from([
            "corim-store",
            "--dbms",
            "postgres",
            "--insecure",
            "db",
            "init",
        ]);
        config.apply_flags(&cli);

        assert_eq!(config.dbms.as_deref(), Some("postgres"));
        assert!(config.insecure);
        assert!(!config.force);

        let store_cfg = config.store_config();
        assert_eq!(store_cfg.dbms, "postgres");
        assert_eq!(store_cfg.hash_alg, "sha256");
    }

    #[test]
    fn yaml_config() {
        let text = "dbms: mysql\ndsn: mysql://db/corim\nhash-alg: sha512\nrequire-label: true\n";
        let config: CliConfig = serde_yaml::from_str(text).unwrap();

        assert_eq!(config.dbms.as_deref(), Some("mysql"));
        assert_eq!(config.hash_alg.as_deref(), Some("sha512"));
        assert!(config.require_label);
        assert!(!config.insecure);
    }
}
