use crate::cli::DetectArgs;
use crate::error::Result;
use cosnap::engine::error::SnapshotError;
use cosnap::engine::formats::SnapshotKind;
use cosnap::workflows::snapshot::detect_format;
use tracing::info;

pub fn run(args: DetectArgs) -> Result<()> {
    info!("Probing {:?} against every registered snapshot format", &args.file);
    let kind = identify(&args.file)?;
    println!("{}: {} snapshot", args.file.display(), kind.display_name());
    Ok(())
}

fn identify(path: &std::path::Path) -> Result<SnapshotKind> {
    detect_format(path)?.ok_or_else(|| {
        SnapshotError::FormatRecognition {
            path: path.to_path_buf(),
            known: SnapshotKind::ALL.iter().map(|kind| kind.display_name()).collect(),
        }
        .into()
    })
}
