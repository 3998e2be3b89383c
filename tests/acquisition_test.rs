//! Acquisition to conversion hand-off.
//!
//! A fake download engine completes a transfer; the acquisition service
//! relocates the files and the auto-convert listener submits the video.

#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{has_sh, scripted_producer, ten_second_clip, FakeEngine, FixedProber, ENCODER_OK};
use reelhaul::context::AutoConvert;
use rh_acquire::{AcquisitionService, MemoryAcquisitionStore, Priority};
use rh_core::config::AcquisitionConfig;
use rh_core::{AcquisitionStatus, ConversionStatus, FileStatus, JobPayload};
use rh_pipeline::{ConversionService, JobStore, MemoryJobStore, Preferences};

fn acquisition_config(root: &Path) -> AcquisitionConfig {
    AcquisitionConfig {
        data_dir: root.join("acq"),
        poll_interval_secs: 1,
        auto_convert: true,
    }
}

fn metainfo(root: &Path) -> std::path::PathBuf {
    let path = root.join("season.torrent");
    std::fs::write(&path, b"d4:infoe").unwrap();
    path
}

#[tokio::test]
async fn ready_video_is_submitted_for_conversion() {
    if !has_sh() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();

    let jobs = Arc::new(MemoryJobStore::new());
    let conversions = Arc::new(
        ConversionService::start(
            1,
            jobs.clone(),
            Arc::new(FixedProber(Some(ten_second_clip()))),
            scripted_producer(dir.path(), "encoder", ENCODER_OK),
            dir.path().join("conversions"),
        )
        .await
        .unwrap(),
    );
    let mut conversion_events = conversions.subscribe();

    let engine = Arc::new(FakeEngine::new(
        "Season 1",
        &[("notes.txt", 3), ("E01.mkv", 16)],
    ));
    let acquisitions = Arc::new(MemoryAcquisitionStore::new());
    let listener = AutoConvert::new(conversions.clone(), Preferences::default());
    let service = AcquisitionService::new(
        engine.clone(),
        acquisitions.clone(),
        &acquisition_config(dir.path()),
        Some(Arc::new(listener)),
    )
    .await
    .unwrap();

    let id = service.import(&metainfo(dir.path())).await.unwrap();
    let imported = service.get(id).await.unwrap();
    assert_eq!(imported.files[0].path, "E01.mkv");
    assert_eq!(imported.files[1].path, "notes.txt");

    // Only the video, by client order index.
    service.start(id, Some(&[0])).await.unwrap();
    let transfer = engine.latest();
    assert_eq!(*transfer.files[1].priority.lock(), Priority::Normal);
    assert_eq!(*transfer.files[0].priority.lock(), Priority::None);

    engine.finish_download(service.downloads_dir());

    let finished = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let event = conversion_events.recv().await.unwrap();
            if event.payload.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("conversion did not finish in time");
    assert_eq!(finished.payload, JobPayload::Terminal(Ok(())));

    let acquisition = service.get(id).await.unwrap();
    assert_eq!(acquisition.status, AcquisitionStatus::Ready);
    let video = &acquisition.files[0];
    assert_eq!(video.status, FileStatus::Ready);
    let ready_path = video.ready_path.clone().unwrap();
    assert_eq!(service.ready_path(video.id).await.unwrap(), Some(ready_path.clone()));
    assert_eq!(acquisition.files[1].status, FileStatus::Idle);
    assert!(acquisition.files[1].ready_path.is_none());

    let job = jobs.get(finished.job_id).await.unwrap().unwrap();
    assert_eq!(job.input, ready_path);
    assert_eq!(job.status, ConversionStatus::Finished);
    assert_eq!(jobs.rows().len(), 1);
}

#[tokio::test]
async fn deleting_an_acquisition_cleans_the_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new("Movie", &[("movie.mkv", 4)]));
    let service = AcquisitionService::new(
        engine.clone(),
        Arc::new(MemoryAcquisitionStore::new()),
        &acquisition_config(dir.path()),
        None,
    )
    .await
    .unwrap();

    let id = service.import(&metainfo(dir.path())).await.unwrap();
    let copy = service.get(id).await.unwrap().metainfo;
    assert!(copy.exists());

    service.start(id, None).await.unwrap();
    std::fs::create_dir_all(service.downloads_dir().join("Movie")).unwrap();
    std::fs::write(service.downloads_dir().join("Movie/movie.mkv"), b"part").unwrap();

    service.delete(id).await.unwrap();
    assert!(!service.is_active(id));

    // Cleanup runs in the background.
    let cleaned = tokio::time::timeout(Duration::from_secs(5), async {
        while copy.exists() || service.downloads_dir().join("Movie").exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cleaned.is_ok());
}

#[tokio::test]
async fn files_are_ordered_by_episode_number() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(
        "Show",
        &[
            ("Show - 10 [1080p].mkv", 10),
            ("Show - 2 [1080p].mkv", 2),
            ("Extras/Show - NCOP.mkv", 5),
            ("Show - 1 [1080p].mkv", 1),
        ],
    ));
    let service = AcquisitionService::new(
        engine.clone(),
        Arc::new(MemoryAcquisitionStore::new()),
        &acquisition_config(dir.path()),
        None,
    )
    .await
    .unwrap();

    let id = service.import(&metainfo(dir.path())).await.unwrap();
    let files = service.get(id).await.unwrap().files;
    let order: Vec<_> = files
        .iter()
        .map(|f| (f.client_order_index, f.path.as_str(), f.torrent_local_index))
        .collect();
    assert_eq!(
        order,
        vec![
            (0, "Extras/Show - NCOP.mkv", 2),
            (1, "Show - 1 [1080p].mkv", 3),
            (2, "Show - 2 [1080p].mkv", 1),
            (3, "Show - 10 [1080p].mkv", 0),
        ]
    );

    // Selection goes by client order: episode 10 only.
    service.start(id, Some(&[3])).await.unwrap();
    let transfer = engine.latest();
    assert_eq!(*transfer.files[0].priority.lock(), Priority::Normal);
    assert_eq!(*transfer.files[3].priority.lock(), Priority::None);
    assert_eq!(service.get(id).await.unwrap().total_selected_length, 10);
}
