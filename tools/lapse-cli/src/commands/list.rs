//! List imported photos.

use lapse_photo_model::PhotoStore;

use crate::context::AppContext;

pub fn run(ctx: AppContext, json: bool) -> anyhow::Result<()> {
    let photos = ctx.store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&photos)?);
        return Ok(());
    }

    println!("Library: {} ({} photos)", ctx.store.root().display(), photos.len());
    for photo in &photos {
        println!(
            "  {:>6}  {}  {}x{}  {}",
            photo.id.as_u64(),
            photo.captured_at.format("%Y-%m-%d %H:%M:%S"),
            photo.width,
            photo.height,
            photo.source.as_ref().map(|s| s.as_str()).unwrap_or("-")
        );
    }
    Ok(())
}
