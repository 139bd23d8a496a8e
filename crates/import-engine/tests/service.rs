mod support;

use std::sync::Arc;
use std::time::Duration;

use lapse_common::{CancellationCoordinator, ImportConfig, MemoryLevel};
use lapse_import_engine::{ImportOutcome, ImportService, STATUS_UPGRADE_CANCELLED};
use lapse_photo_model::{MemoryPhotoStore, PhotoStore};
use tokio::sync::watch;

use support::*;

fn service(
    source: ScriptedSource,
    level: MemoryLevel,
) -> (
    ImportService,
    Arc<MemoryPhotoStore>,
    Arc<CancellationCoordinator>,
    Arc<RecordingProgress>,
    watch::Sender<MemoryLevel>,
) {
    let (level_tx, level_rx) = watch::channel(level);
    let store = Arc::new(MemoryPhotoStore::new());
    let coordinator = Arc::new(CancellationCoordinator::new());
    let progress = Arc::new(RecordingProgress::default());
    let service = ImportService::new(
        Arc::new(source),
        store.clone(),
        level_rx,
        coordinator.clone(),
        ImportConfig::without_pacing(),
    )
    .with_progress(progress.clone());
    (service, store, coordinator, progress, level_tx)
}

#[tokio::test]
async fn test_new_import_cancels_previous() {
    let (service, _store, coordinator, _progress, _level) = service(
        ScriptedSource::new().with_latency(Duration::from_millis(20)),
        MemoryLevel::Normal,
    );

    let first = service.start_import(assets(30));
    let second = service.start_import(assets(2));
    assert_ne!(first.id(), second.id());

    let first = first.wait().await.unwrap().unwrap();
    let second = second.wait().await.unwrap().unwrap();
    assert_eq!(first.outcome, ImportOutcome::Cancelled);
    assert_eq!(second.outcome, ImportOutcome::Completed);
    assert_eq!(second.photos.len(), 2);
    assert_eq!(coordinator.active_count(), 0);
}

#[tokio::test]
async fn test_cancel_import_by_handle() {
    let (service, _store, coordinator, _progress, _level) = service(
        ScriptedSource::new().with_latency(Duration::from_millis(20)),
        MemoryLevel::Normal,
    );

    let handle = service.start_import(assets(30));
    let id = handle.id();
    assert!(!service.cancel_upgrade(id));
    assert!(service.cancel_import(id));
    assert!(!service.cancel_import(id));

    let report = handle.wait().await.unwrap().unwrap();
    assert_eq!(report.outcome, ImportOutcome::Cancelled);
    assert_eq!(coordinator.active_count(), 0);
    assert!(!service.cancel_import(id));
}

#[tokio::test]
async fn test_cancel_finished_import_is_noop() {
    let (service, _store, _coordinator, _progress, _level) =
        service(ScriptedSource::new(), MemoryLevel::Normal);
    let handle = service.start_import(assets(3));
    let id = handle.id();
    handle.wait().await.unwrap().unwrap();
    assert!(!service.cancel_import(id));
}

#[tokio::test]
async fn test_upgrade_replaces_fast_images() {
    let (service, store, _coordinator, progress, _level) =
        service(ScriptedSource::new(), MemoryLevel::Normal);
    let report = service.start_import(assets(3)).wait().await.unwrap().unwrap();
    assert!(report.photos.iter().all(|p| p.width == 256));

    let upgrade = service
        .start_upgrade(store.list().unwrap())
        .wait()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upgrade.outcome, ImportOutcome::Completed);
    assert_eq!(upgrade.upgraded, 3);

    let photos = store.list().unwrap();
    assert!(photos.iter().all(|p| p.width == 512));
    assert_eq!(
        photos.iter().map(|p| p.id).collect::<Vec<_>>(),
        report.photos.iter().map(|p| p.id).collect::<Vec<_>>()
    );
    let (status, fraction) = progress.last().unwrap();
    assert_eq!(status, "Upgrading photo quality... 3/3");
    assert!((fraction - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_upgrade_stops_under_critical_memory() {
    let (service, store, _coordinator, progress, level) =
        service(ScriptedSource::new(), MemoryLevel::Normal);
    service.start_import(assets(2)).wait().await.unwrap().unwrap();

    level.send_replace(MemoryLevel::Critical);
    let upgrade = service
        .start_upgrade(store.list().unwrap())
        .wait()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upgrade.outcome, ImportOutcome::Cancelled);
    assert_eq!(upgrade.upgraded, 0);
    assert_eq!(progress.last().unwrap().0, STATUS_UPGRADE_CANCELLED);
}

#[tokio::test]
async fn test_failed_upgrade_keeps_fast_image() {
    let (service, store, _coordinator, _progress, _level) =
        service(ScriptedSource::new(), MemoryLevel::Normal);
    service.start_import(assets(2)).wait().await.unwrap().unwrap();

    let mut photos = store.list().unwrap();
    photos[1].source = Some(lapse_photo_model::AssetId::new("missing"));
    photos[0].source = None;
    let failing = ScriptedSource::new().failing("missing", u32::MAX);
    let service = ImportService::new(
        Arc::new(failing),
        store.clone(),
        watch::channel(MemoryLevel::Normal).1,
        Arc::new(CancellationCoordinator::new()),
        ImportConfig::without_pacing(),
    );

    let upgrade = service.start_upgrade(photos).wait().await.unwrap().unwrap();
    assert_eq!(upgrade.skipped, 1);
    assert_eq!(upgrade.failed, 1);
    assert!(store.list().unwrap().iter().all(|p| p.width == 256));
}
