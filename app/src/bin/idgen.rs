use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use infra::ids::IdGen;
use infra::untyped_ids::UntypedId;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "idgen", about = "Generate and inspect identifiers")]
enum Commands {
    #[structopt(name = "gen", about = "Generate fresh identifiers")]
    Generate(Generate),
    #[structopt(name = "hash", about = "Derive identifiers from names")]
    Hash(Hash),
    #[structopt(name = "decompose", about = "Show an identifier's parts")]
    Decompose(Decompose),
}

#[derive(Debug, StructOpt)]
struct Generate {
    #[structopt(short = "n", long = "count", default_value = "1")]
    count: usize,
    /// Print as a typed id, eg. `tenant` or `branch`
    #[structopt(short = "p", long = "prefix")]
    prefix: Option<String>,
}

#[derive(Debug, StructOpt)]
struct Hash {
    #[structopt(short = "p", long = "prefix")]
    prefix: Option<String>,
    inputs: Vec<String>,
}

#[derive(Debug, StructOpt)]
struct Decompose {
    /// Bare or prefixed identifiers
    ids: Vec<String>,
}

fn show(prefix: Option<&str>, id: UntypedId) -> String {
    match prefix {
        Some(prefix) => format!("{}-{}", prefix, id),
        None => id.to_string(),
    }
}

fn main() -> Result<()> {
    let cmd = Commands::from_args();

    match cmd {
        Commands::Generate(opt) => {
            let idgen = IdGen::new();
            for _ in 0..opt.count {
                println!("{}", show(opt.prefix.as_deref(), idgen.untyped()));
            }
        }
        Commands::Hash(opt) => {
            for inp in opt.inputs.iter() {
                let id = UntypedId::hashed(inp.as_bytes());
                println!("{}", show(opt.prefix.as_deref(), id));
            }
        }

        Commands::Decompose(opt) => {
            for raw in opt.ids {
                let bare = raw.rsplit('-').next().unwrap_or(&raw);
                let id: UntypedId = bare.parse()?;
                let stamp: DateTime<Utc> = id.timestamp().into();
                println!(
                    "{}: t:{}; r:0x{:0>16x}",
                    raw,
                    stamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    id.random()
                );
            }
        }
    }

    Ok(())
}
