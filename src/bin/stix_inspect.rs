use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use notion_stix::mitre::Mitre;
use notion_stix::model::ObjectKind;
use notion_stix::stix::Collection;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print what an import of a STIX bundle would create")]
struct Args {
    /// STIX2 bundle to inspect
    bundle: PathBuf,

    /// Also list the names of each object
    #[arg(long)]
    names: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mitre = Mitre::new(Collection::load(&args.bundle).await?.into());

    for kind in [
        ObjectKind::AttackPattern,
        ObjectKind::Campaign,
        ObjectKind::Group,
        ObjectKind::Malware,
        ObjectKind::Indicator,
    ] {
        let records = mitre.records(kind);
        println!("{:<16} {:>6}", kind.as_str(), records.len());
        if args.names {
            for record in records {
                println!("    {}  {}", record.id(), record.name());
            }
        }
    }
    Ok(())
}
