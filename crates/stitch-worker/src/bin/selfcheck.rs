//! Environment self-check for the packaging worker.

use std::path::Path;

use stitch_media::{check_ffmpeg, check_ffprobe, FfmpegRunner, Transcoder};
use stitch_worker::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env();

    println!(
        "stitch-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;

    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    println!("stitch-selfcheck: ffmpeg at {}", ffmpeg.display());
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!("stitch-selfcheck: ffprobe at {}", ffprobe.display());

    let codec = &config.encoding.hardware_codec;
    let hardware = FfmpegRunner::new().supports_encoder(codec).await?;
    println!(
        "stitch-selfcheck: hardware encoder {} {}",
        codec,
        if hardware { "available" } else { "not available" }
    );

    if let Some(root) = &config.local_store_root {
        if !tokio::fs::try_exists(root).await? {
            return Err(anyhow::anyhow!(
                "STITCH_LOCAL_STORE_ROOT {} does not exist",
                root.display()
            ));
        }
    }

    println!("stitch-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = tempfile::Builder::new()
        .prefix("selfcheck-")
        .tempfile_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} is not writable: {}", path.display(), e))?;
    drop(probe);
    Ok(())
}
