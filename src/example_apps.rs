use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, error::ErrorKind};

use crate::cache::{CountCache, FileCountStore};
use crate::config::{SourceLayout, SplitConfig, SweepConfig};
use crate::constants::driver::DEFAULT_KEY_BATCH_SIZE;
use crate::constants::source::{DEFAULT_KEY_COLUMN, DEFAULT_TIME_COLUMN};
use crate::constants::split::{DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION};
use crate::data::WindowTensors;
use crate::driver::{BatchDriver, SweepResult};
use crate::filter::{CmpOp, Filter, Predicate, Value};
use crate::source::SqliteSource;
use crate::split::train_test_split;

#[derive(Debug, Parser)]
#[command(
    name = "sweep_demo",
    disable_help_subcommand = true,
    about = "Extract sliding-window tensors from a SQLite table",
    long_about = "Walk the keys of a SQLite observation table in batches and build aligned (history, horizon) window tensors for every configuration of the sweep.",
    after_help = "Group counts are cached on disk between runs. Pass --clear-cache after the table is rebuilt."
)]
/// CLI for `sweep_demo`.
///
/// Common usage:
/// - Keep default cache file location: `.keyed_windows/count_cache.bin`
/// - Set an explicit file path: `--cache-store-path /tmp/count_cache.bin`
/// - Set a custom directory and keep default filename: `--cache-store-dir /tmp/windows`
/// - Repeat `--where <CONDITION>` to restrict rows, e.g. `--where "time>=30"`
struct SweepDemoCli {
    #[arg(long, value_name = "PATH", help = "SQLite database holding the table")]
    db: PathBuf,
    #[arg(long, help = "Observation table to read")]
    table: String,
    #[arg(
        long,
        value_name = "COLUMN,...",
        value_delimiter = ',',
        required = true,
        help = "Feature columns, in tensor order"
    )]
    features: Vec<String>,
    #[arg(
        long = "label-features",
        value_name = "COLUMN,...",
        value_delimiter = ',',
        help = "Features copied into labels (defaults to every feature)"
    )]
    label_features: Option<Vec<String>>,
    #[arg(
        long,
        value_name = "H,...",
        value_delimiter = ',',
        default_value = "1",
        value_parser = parse_positive_usize,
        help = "History lengths to evaluate"
    )]
    history: Vec<usize>,
    #[arg(
        long,
        value_name = "T,...",
        value_delimiter = ',',
        default_value = "1",
        value_parser = parse_positive_usize,
        help = "Horizons to evaluate"
    )]
    horizon: Vec<usize>,
    #[arg(
        long = "key-batch-size",
        default_value_t = DEFAULT_KEY_BATCH_SIZE,
        value_parser = parse_positive_usize,
        help = "Keys fetched per batch"
    )]
    key_batch_size: usize,
    #[arg(
        long = "total-keys",
        help = "Keys to consume (defaults to every key under the filter)"
    )]
    total_keys: Option<usize>,
    #[arg(
        long = "where",
        value_name = "CONDITION",
        value_parser = parse_predicate_arg,
        help = "Row condition such as name!='' or time>=30, repeat to combine with AND"
    )]
    conditions: Vec<Predicate>,
    #[arg(long = "key-column", default_value = DEFAULT_KEY_COLUMN, help = "Composite key column")]
    key_column: String,
    #[arg(long = "time-column", default_value = DEFAULT_TIME_COLUMN, help = "Time ordering column")]
    time_column: String,
    #[arg(
        long = "cache-store-path",
        value_name = "CACHE_STORE_PATH",
        help = "Optional path for the persisted count cache file"
    )]
    cache_store_path: Option<PathBuf>,
    #[arg(
        long = "cache-store-dir",
        value_name = "DIR",
        conflicts_with = "cache_store_path",
        help = "Optional directory for the persisted count cache file (uses count_cache.bin filename)"
    )]
    cache_store_dir: Option<PathBuf>,
    #[arg(
        long = "clear-cache",
        help = "Drop cached counts for the table before running"
    )]
    clear_cache: bool,
    #[arg(long, help = "Also report a shuffled train/test split per configuration")]
    split: bool,
    #[arg(
        long = "test-fraction",
        default_value_t = DEFAULT_TEST_FRACTION,
        help = "Fraction of windows assigned to the test split"
    )]
    test_fraction: f64,
    #[arg(long, default_value_t = DEFAULT_SPLIT_SEED, help = "Seed for the train/test shuffle")]
    seed: u64,
}

/// Parse `args_iter` as `sweep_demo` arguments and run the sweep, printing one
/// line per configuration.
pub fn run_sweep_demo<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<SweepDemoCli, _>(std::iter::once("sweep_demo".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let store_path = if let Some(path) = cli.cache_store_path {
        path
    } else if let Some(dir) = cli.cache_store_dir {
        FileCountStore::default_path_in_dir(dir)
    } else {
        FileCountStore::default_path()
    };
    println!("Persisting group counts to {}", store_path.display());
    let cache = CountCache::new(Arc::new(FileCountStore::open(&store_path)?));
    if cli.clear_cache {
        cache.clear_cache(&cli.table)?;
    }

    let source = SqliteSource::new(&cli.db).with_layout(SourceLayout {
        key_column: cli.key_column,
        time_column: cli.time_column,
    });
    let filter = cli
        .conditions
        .into_iter()
        .fold(Filter::all(), |filter, predicate| {
            filter.and(predicate.column, predicate.op, predicate.value)
        });
    let sweep = SweepConfig {
        history_values: cli.history,
        horizon_values: cli.horizon,
        key_batch_size: cli.key_batch_size,
        total_keys: cli.total_keys,
        features: cli.features,
        label_features: cli.label_features,
    };

    let result = BatchDriver::new(&source, &cache).run(&cli.table, &filter, &sweep)?;
    print_sweep(&result);

    if cli.split {
        let split = SplitConfig {
            test_fraction: cli.test_fraction,
            seed: cli.seed,
        };
        for (key, tensors) in &result {
            let parts = train_test_split(tensors, split)?;
            println!(
                "H={} T={} split: train={} test={}",
                key.0,
                key.1,
                parts.train.len(),
                parts.test.len()
            );
        }
    }
    Ok(())
}

fn print_sweep(result: &SweepResult) {
    if result.values().all(WindowTensors::is_empty) {
        println!("No windows produced. Ensure groups hold at least max(H) + max(T) rows.");
        return;
    }
    for ((history, horizon), tensors) in result {
        println!(
            "H={} T={} windows={} inputs={:?} labels={:?}",
            history,
            horizon,
            tensors.len(),
            tensors.inputs.shape(),
            tensors.labels.shape()
        );
    }
}

/// Parse `column<op>literal` where `<op>` is one of `>=`, `<=`, `!=`, `=`, `<`,
/// `>`. Quoted literals are text; otherwise integers, then reals, then text.
fn parse_predicate_arg(raw: &str) -> Result<Predicate, String> {
    const OPERATORS: [(&str, CmpOp); 6] = [
        (">=", CmpOp::Ge),
        ("<=", CmpOp::Le),
        ("!=", CmpOp::Ne),
        ("=", CmpOp::Eq),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];
    let (column, op, literal) = OPERATORS
        .iter()
        .filter_map(|(symbol, op)| {
            raw.find(symbol)
                .map(|at| (at, &raw[..at], *op, &raw[at + symbol.len()..]))
        })
        .min_by_key(|(at, ..)| *at)
        .map(|(_, column, op, literal)| (column.trim(), op, literal.trim()))
        .ok_or_else(|| format!("Could not find a comparison operator in --where value '{raw}'"))?;
    if column.is_empty() {
        return Err(format!("--where value '{raw}' is missing a column name"));
    }
    Ok(Predicate {
        column: column.to_string(),
        op,
        value: parse_literal(literal),
    })
}

fn parse_literal(literal: &str) -> Value {
    let quoted = literal.len() >= 2
        && ((literal.starts_with('\'') && literal.ends_with('\''))
            || (literal.starts_with('"') && literal.ends_with('"')));
    if quoted {
        return Value::Text(literal[1..literal.len() - 1].to_string());
    }
    if let Ok(value) = literal.parse::<i64>() {
        return Value::Integer(value);
    }
    match literal.parse::<f64>() {
        Ok(value) => Value::Real(value),
        Err(_) => Value::Text(literal.to_string()),
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_conditions_parse_into_predicates() {
        let predicate = parse_predicate_arg("name!=''").unwrap();
        assert_eq!(predicate.column, "name");
        assert_eq!(predicate.op, CmpOp::Ne);
        assert_eq!(predicate.value, Value::Text(String::new()));

        let predicate = parse_predicate_arg("time >= 30").unwrap();
        assert_eq!(predicate.op, CmpOp::Ge);
        assert_eq!(predicate.value, Value::Integer(30));

        assert_eq!(parse_predicate_arg("hp<0.5").unwrap().value, Value::Real(0.5));
        assert!(parse_predicate_arg("time").is_err());
        assert!(parse_predicate_arg("=3").is_err());
    }

    #[test]
    fn cli_parses_lists_and_rejects_zero() {
        let cli = parse_cli::<SweepDemoCli, _>([
            "sweep_demo",
            "--db",
            "games.db",
            "--table",
            "champs",
            "--features",
            "pos_x,pos_z",
            "--history",
            "2,3",
            "--horizon",
            "1",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(cli.features, vec!["pos_x", "pos_z"]);
        assert_eq!(cli.history, vec![2, 3]);
        assert_eq!(cli.key_batch_size, DEFAULT_KEY_BATCH_SIZE);
        assert!(!cli.split);
        assert_eq!(cli.test_fraction, DEFAULT_TEST_FRACTION);

        let err = parse_cli::<SweepDemoCli, _>([
            "sweep_demo",
            "--db",
            "games.db",
            "--table",
            "champs",
            "--features",
            "pos_x",
            "--history",
            "0",
        ]);
        assert!(err.is_err());
    }
}
