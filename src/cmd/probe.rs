use std::path::Path;

use anyhow::Result;

use clipwright::{Ffprobe, RunConfig};

pub async fn cmd_probe(config: &RunConfig, file: &Path) -> Result<()> {
    let probe = Ffprobe::new(config.ffprobe_path.clone(), config.timeouts.probe());
    let info = probe.inspect(file).await?;

    println!("📼 {}", file.display());
    println!("   Duration: {:.3}s", info.duration);
    if let (Some(w), Some(h)) = (info.width, info.height) {
        println!("   Video: {w}x{h}");
    } else if info.has_video {
        println!("   Video: yes");
    }
    println!("   Audio: {}", if info.has_audio { "yes" } else { "no" });
    Ok(())
}
