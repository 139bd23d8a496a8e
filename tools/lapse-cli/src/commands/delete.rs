//! Delete a photo.

use lapse_photo_model::{PhotoId, PhotoStore};

use crate::context::AppContext;

pub fn run(ctx: AppContext, id: PhotoId) -> anyhow::Result<()> {
    ctx.store.remove(id)?;
    println!("Deleted photo {id}");
    Ok(())
}
