use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use dynamics_webapi::api::constants::MAX_PAGE_SIZE;
use dynamics_webapi::api::{ConnectionOptions, DynamicsClient, Operation, OrderBy, Query, Record, RequestEncoder};
use dynamics_webapi::config::Config;

#[derive(Parser)]
#[command(name = "dynamics-webapi")]
#[command(about = "Query a Dynamics 365 / Dataverse organisation through its Web API")]
#[command(version)]
struct Cli {
    /// Connection name from the config file (defaults to the configured default)
    #[arg(short, long, global = true)]
    env: Option<String>,

    /// Config file to read instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the user, business unit and organisation of the connection
    Whoami,
    /// Retrieve records from an entity set
    Query(QueryArgs),
    /// List the options of a picklist attribute
    Optionset {
        /// Entity logical name, e.g. account
        entity: String,
        /// Attribute logical name, e.g. industrycode
        attribute: String,
    },
    /// Print the request a query would send, without sending it
    Url(QueryArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// Entity set name, e.g. accounts
    entity_set: String,

    /// Entity logical name (defaults to the entity set name)
    #[arg(long)]
    entity: Option<String>,

    /// Comma-separated attributes for $select
    #[arg(short, long, value_delimiter = ',')]
    select: Vec<String>,

    /// Raw $filter expression
    #[arg(short, long)]
    filter: Option<String>,

    /// Ordering, e.g. "name desc" (repeatable)
    #[arg(short, long)]
    orderby: Vec<String>,

    /// Server-side $top
    #[arg(short, long)]
    top: Option<u32>,

    /// Maximum number of records to fetch across pages
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    max: Option<u32>,
}

impl QueryArgs {
    fn max_records(&self) -> Option<usize> {
        self.max.map(|max| max as usize)
    }

    fn to_query(&self) -> Result<Query> {
        let logical_name = self.entity.as_deref().unwrap_or(&self.entity_set);
        let mut query = Query::new(logical_name)
            .path(&self.entity_set)
            .context("Invalid entity set")?
            .select(self.select.iter().map(|s| s.trim()));
        if let Some(filter) = &self.filter {
            query = query.filter(filter.as_str());
        }
        for order in &self.orderby {
            let order = OrderBy::parse(order).with_context(|| format!("Invalid ordering: '{}'", order))?;
            query = query.order_by(order);
        }
        if let Some(top) = self.top {
            query = query.top(top);
        }
        Ok(query)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let connection = config.connection(cli.env.as_deref())?.clone();

    if let Commands::Url(args) = &cli.command {
        return print_request(&connection, args);
    }

    let client = DynamicsClient::connect(connection.clone())
        .with_context(|| format!("Failed to set up connection '{}'", connection.name))?;

    match cli.command {
        Commands::Whoami => {
            let me = client.who_am_i().await.context("WhoAmI failed")?;
            println!("{} {}", "Connection:".bold(), connection.name.bright_green());
            println!("{} {}", "Service root:".bold(), client.service_root());
            println!("{} {}", "User:".bold(), me.user_id);
            println!("{} {}", "Business unit:".bold(), me.business_unit_id);
            println!("{} {}", "Organisation:".bold(), me.organization_id);
        }
        Commands::Query(args) => {
            let query = args.to_query()?;
            let records = client
                .fetch(&query, args.max_records())
                .await
                .with_context(|| format!("Failed to query '{}'", args.entity_set))?;
            print_records(&records)?;
            eprintln!("{}", format!("{} record(s)", records.len()).dimmed());
        }
        Commands::Optionset { entity, attribute } => {
            let options = client
                .optionset(&entity, &attribute)
                .await
                .with_context(|| format!("Failed to read option set {}.{}", entity, attribute))?;
            if options.is_empty() {
                println!("{}", "No options defined".yellow());
            }
            for option in options {
                let label = option.label.unwrap_or_else(|| "(no label)".to_string());
                println!("{:>12}  {}", option.value.to_string().cyan(), label);
            }
        }
        Commands::Url(_) => {}
    }

    Ok(())
}

fn print_request(connection: &ConnectionOptions, args: &QueryArgs) -> Result<()> {
    let mut encoder = RequestEncoder::new(connection.service_root()?);
    for (name, value) in connection.bypass.headers() {
        encoder = encoder.with_header(name, value);
    }

    let query = args.to_query()?;
    let page_size = match query.top_value() {
        Some(_) => None,
        None => Some(args.max_records().unwrap_or(connection.max_records).min(MAX_PAGE_SIZE)),
    };
    let request = encoder.encode(&Operation::retrieve_multiple(query, page_size))?;

    println!(
        "{} {}",
        request.method.to_string().bold(),
        request.absolute_url(encoder.service_root()).bright_green()
    );
    for (name, value) in request.headers.iter() {
        println!("{}: {}", name.dimmed(), value);
    }
    Ok(())
}

fn print_records(records: &[Record]) -> Result<()> {
    for record in records {
        let mut object = record.attributes.clone();
        for (attribute, formatted) in &record.formatted_values {
            object.insert(
                format!("{}@formatted", attribute),
                serde_json::Value::String(formatted.clone()),
            );
        }
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(object))
            .context("Failed to format record")?;
        println!("{}", text);
    }
    Ok(())
}
