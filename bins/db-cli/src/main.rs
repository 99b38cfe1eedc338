use eyre::{Result, WrapErr, bail, eyre};
use local_db::{DbError, DbInspector, Table};
use serde::Serialize;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "db-cli", about = "Inspect a warp node database")]
struct Options {
    /// Database file, or the node's `db_dir`.
    #[structopt(long)]
    path: PathBuf,
    #[structopt(long)]
    table: Option<String>,
    #[structopt(long)]
    key: Option<String>,
    #[structopt(long)]
    prefix: Option<String>,
    #[structopt(long)]
    limit: Option<usize>,
    /// Print values as hex instead of decoding them.
    #[structopt(long)]
    raw: bool,
    /// Work on a repaired copy when the database was not closed cleanly.
    #[structopt(long)]
    copy: bool,
}

enum Query {
    Tables,
    Get { table: Table, key: String },
    Scan { table: Table, prefix: Option<String>, limit: usize },
}

impl Options {
    fn query(&self) -> Result<Query> {
        let Some(name) = self.table.as_deref() else {
            if self.key.is_some() || self.prefix.is_some() || self.limit.is_some() {
                bail!("--key, --prefix and --limit require --table");
            }
            return Ok(Query::Tables);
        };
        let table = Table::from_name(name).ok_or_else(|| eyre!("unknown table: {name}"))?;
        match (&self.key, &self.prefix) {
            (Some(_), Some(_)) => bail!("--key and --prefix are mutually exclusive"),
            (Some(key), None) => Ok(Query::Get {
                table,
                key: key.clone(),
            }),
            (None, prefix) => Ok(Query::Scan {
                table,
                prefix: prefix.clone(),
                limit: self.limit.unwrap_or(usize::MAX),
            }),
        }
    }
}

#[derive(Serialize)]
struct Entry {
    key: String,
    value: serde_json::Value,
}

#[derive(Serialize)]
struct RawEntry {
    key: String,
    value_hex: String,
}

fn main() -> Result<()> {
    let opt = Options::from_args();
    let query = opt.query()?;

    let db_path = local_db::resolve_db_path(&opt.path);
    if !db_path.exists() {
        bail!("db not found: {}", db_path.display());
    }

    let inspector = if opt.copy {
        DbInspector::open_repaired_copy(&db_path).wrap_err("open repaired copy")?
    } else {
        match DbInspector::open(&db_path) {
            Ok(inspector) => inspector,
            Err(DbError::NeedsRepair) => {
                bail!("database needs repair; rerun with --copy to work on a safe copy")
            }
            Err(err) => return Err(err).wrap_err("open db"),
        }
    };

    match query {
        Query::Tables => {
            for table in Table::ALL {
                println!("{}", table.name());
            }
        }
        Query::Get { table, key } => match inspector.get_raw(table, &key)? {
            Some(value) => print_value(&key, &value, opt.raw)?,
            None => bail!("key not found: {key}"),
        },
        Query::Scan {
            table,
            prefix,
            limit,
        } => {
            for (key, value) in inspector.scan_raw(table, prefix.as_deref(), limit)? {
                print_value(&key, &value, opt.raw)?;
            }
        }
    }
    Ok(())
}

fn print_value(key: &str, value: &[u8], raw: bool) -> Result<()> {
    if raw {
        return print_json(&RawEntry {
            key: key.to_string(),
            value_hex: format!("0x{}", hex::encode(value)),
        });
    }

    // Values are self-describing MessagePack written with field names.
    let decoded: serde_json::Value = rmp_serde::from_slice(value).wrap_err("decode msgpack")?;
    print_json(&Entry {
        key: key.to_string(),
        value: decoded,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let data = serde_json::to_string(value).wrap_err("serialize json")?;
    println!("{data}");
    Ok(())
}
