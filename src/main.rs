//! pg-autoindex: suggest, and optionally create, B-tree indexes that reduce
//! planner cost for an observed PostgreSQL workload.

use std::io;
use std::process;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use pg_autoindex::advisor::Advisor;
use pg_autoindex::gateway::SqlGateway;
use pg_autoindex::source::{
    FileSource, LogStreamSource, QuerySource, SingleStatementSource, StatStatementsSource,
};
use pg_autoindex::{DbTarget, Error, LogLevel, Options, Result};

fn main() {
    let matches = build_cli().get_matches();
    let options = match options_from_matches(&matches) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };
    init_logging(&options);
    if let Err(err) = run(&options) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn build_cli() -> Command {
    Command::new("pg-autoindex")
        .about("Suggests B-tree indexes that reduce planner cost for an observed workload")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("dbname")
                .help("Database name, postgres:// URI, or key=value connection string")
                .short('d')
                .long("dbname")
                .required(true),
        )
        .arg(Arg::new("host").help("Database server host").long("host"))
        .arg(
            Arg::new("port")
                .help("Database server port")
                .short('p')
                .long("port"),
        )
        .arg(
            Arg::new("username")
                .help("Database user")
                .short('U')
                .long("username"),
        )
        .arg(
            Arg::new("statement")
                .help("Evaluate a single statement, then exit")
                .short('s')
                .long("statement"),
        )
        .arg(
            Arg::new("create")
                .help("Create accepted indexes")
                .long("create")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval")
                .help("Seconds between batches on a streaming source")
                .long("interval")
                .default_value("60"),
        )
        .arg(
            Arg::new("min-time")
                .help("Only consider queries with at least this many minutes of accumulated time")
                .long("min-time")
                .default_value("0"),
        )
        .arg(
            Arg::new("exclude")
                .help("Comma-separated tables never to index")
                .long("exclude"),
        )
        .arg(
            Arg::new("include")
                .help("Comma-separated tables to restrict analysis to")
                .long("include"),
        )
        .arg(
            Arg::new("log-level")
                .help("Verbosity: info, debug, debug2, debug3, or error")
                .long("log-level")
                .default_value("info"),
        )
        .arg(
            Arg::new("log-sql")
                .help("Echo every SQL statement issued")
                .long("log-sql")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pg-stat-statements")
                .help("Read the workload from pg_stat_statements instead of stdin")
                .long("pg-stat-statements")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("files")
                .help("Files to evaluate, one batch each")
                .value_name("FILE")
                .num_args(0..),
        )
}

fn options_from_matches(matches: &ArgMatches) -> Result<Options> {
    let dbname = matches
        .get_one::<String>("dbname")
        .ok_or_else(|| Error::Config("--dbname is required".to_string()))?;
    let port = matches
        .get_one::<String>("port")
        .map(|port| {
            port.parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port: {}", port)))
        })
        .transpose()?;
    let interval = matches
        .get_one::<String>("interval")
        .map(|interval| {
            interval
                .parse::<u64>()
                .map_err(|_| Error::Config(format!("invalid interval: {}", interval)))
        })
        .transpose()?
        .unwrap_or(60);
    let min_time_minutes = matches
        .get_one::<String>("min-time")
        .map(|min_time| {
            min_time
                .parse::<f64>()
                .map_err(|_| Error::Config(format!("invalid min-time: {}", min_time)))
        })
        .transpose()?
        .unwrap_or(0.0);
    let log_level = matches
        .get_one::<String>("log-level")
        .map(|level| level.parse::<LogLevel>().map_err(Error::Config))
        .transpose()?
        .unwrap_or_default();

    Ok(Options {
        target: DbTarget::parse(dbname),
        host: matches.get_one::<String>("host").cloned(),
        port,
        user: matches.get_one::<String>("username").cloned(),
        statement: matches.get_one::<String>("statement").cloned(),
        files: matches
            .get_many::<String>("files")
            .map(|files| files.cloned().collect())
            .unwrap_or_default(),
        create: matches.get_flag("create"),
        interval,
        min_time_minutes,
        include: matches.get_one::<String>("include").map(|s| comma_list(s)),
        exclude: matches
            .get_one::<String>("exclude")
            .map(|s| comma_list(s))
            .unwrap_or_default(),
        log_level,
        log_sql: matches.get_flag("log-sql"),
        use_stat_statements: matches.get_flag("pg-stat-statements"),
    })
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn init_logging(options: &Options) {
    let directive = format!("pg_autoindex={}", options.log_level.tracing_directive());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let fmt_layer = fmt::layer().with_target(false).without_time();
    Registry::default().with(env_filter).with(fmt_layer).init();
}

fn run(options: &Options) -> Result<()> {
    let gateway = SqlGateway::connect(options)?;
    let advisor = Advisor::new(&gateway, options);
    let mut source = make_source(options, &gateway);
    advisor.run(source.as_mut())
}

fn make_source<'g>(options: &Options, gateway: &'g SqlGateway) -> Box<dyn QuerySource + 'g> {
    if let Some(statement) = &options.statement {
        Box::new(SingleStatementSource::new(statement.clone()))
    } else if !options.files.is_empty() {
        Box::new(FileSource::new(options.files.clone()))
    } else if options.use_stat_statements {
        Box::new(StatStatementsSource::new(gateway, options))
    } else {
        Box::new(LogStreamSource::new(io::stdin().lock(), options))
    }
}
