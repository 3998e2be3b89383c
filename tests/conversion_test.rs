//! Conversion service integration tests.
//!
//! Drives [`ConversionService`] end to end with a scripted encoder and
//! checks what ends up in the job store and on disk.

#![cfg(unix)]

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    has_sh, scripted_producer, ten_second_clip, FixedProber, ENCODER_FAIL, ENCODER_HANG,
    ENCODER_OK,
};
use rh_core::{ConversionStatus, Error, ExitError, JobId, JobPayload, QueueEvent};
use rh_pipeline::{
    ConversionRequest, ConversionService, JobStore, MemoryJobStore, Preferences,
    SelectionPreference,
};
use tokio::sync::broadcast;

async fn start(
    dir: &Path,
    script: &str,
    probe: FixedProber,
) -> (ConversionService, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let service = ConversionService::start(
        1,
        store.clone(),
        Arc::new(probe),
        scripted_producer(dir, "encoder", script),
        dir.join("out"),
    )
    .await
    .unwrap();
    (service, store)
}

fn request(input: &str) -> ConversionRequest {
    ConversionRequest {
        input: PathBuf::from(input),
        ..Default::default()
    }
}

/// Collect events for `id` up to and including its terminal event.
async fn events_for(rx: &mut broadcast::Receiver<QueueEvent>, id: JobId) -> Vec<JobPayload> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.job_id != id {
                continue;
            }
            let done = event.payload.is_terminal();
            seen.push(event.payload);
            if done {
                break;
            }
        }
    })
    .await
    .expect("job did not finish in time");
    seen
}

#[tokio::test]
async fn successful_conversion_is_recorded() {
    if !has_sh() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = start(dir.path(), ENCODER_OK, FixedProber(Some(ten_second_clip()))).await;
    let mut rx = service.subscribe();

    let id = service.submit(request("/media/in.mkv")).await.unwrap();
    let events = events_for(&mut rx, id).await;

    assert_eq!(events.first(), Some(&JobPayload::Started));
    assert_eq!(events.last(), Some(&JobPayload::Terminal(Ok(()))));
    assert!(events
        .iter()
        .any(|e| matches!(e, JobPayload::Progress(_))));

    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, ConversionStatus::Finished);
    assert_eq!(row.progress.progress_pct, 100);

    let folder = service.job_folder(id);
    let output = folder.join("video.mp4");
    assert_eq!(row.output.as_deref(), Some(output.as_path()));
    assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "converted");

    // The heaviest audio track is mapped when no language is preferred.
    let command = row.command.unwrap();
    assert!(command.contains("0:a:1"), "{command}");

    let transcript = std::fs::read_to_string(folder.join("log.txt")).unwrap();
    assert!(transcript.contains("ffmpeg version test"));
    assert!(transcript.contains("time=00:00:05.00"));
}

#[tokio::test]
async fn language_preference_changes_the_mapped_track() {
    if !has_sh() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = start(dir.path(), ENCODER_OK, FixedProber(Some(ten_second_clip()))).await;
    let mut rx = service.subscribe();

    let id = service
        .submit(ConversionRequest {
            input: PathBuf::from("/media/in.mkv"),
            preferences: Preferences {
                audio: SelectionPreference {
                    language: Some("eng".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
            output: None,
        })
        .await
        .unwrap();
    events_for(&mut rx, id).await;

    let command = store.get(id).await.unwrap().unwrap().command.unwrap();
    assert!(command.contains("0:a:0"), "{command}");
}

#[tokio::test]
async fn failing_encoder_marks_error() {
    if !has_sh() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (service, store) =
        start(dir.path(), ENCODER_FAIL, FixedProber(Some(ten_second_clip()))).await;
    let mut rx = service.subscribe();

    let id = service.submit(request("/media/in.mkv")).await.unwrap();
    let events = events_for(&mut rx, id).await;

    assert_matches!(
        events.last(),
        Some(JobPayload::Terminal(Err(ExitError::Status(_))))
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, JobPayload::Line(l) if l.contains("Invalid data"))));

    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, ConversionStatus::Error);
    assert!(row.error.is_some());
}

#[tokio::test]
async fn cancelling_a_running_conversion() {
    if !has_sh() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (service, store) =
        start(dir.path(), ENCODER_HANG, FixedProber(Some(ten_second_clip()))).await;
    let mut rx = service.subscribe();

    let id = service.submit(request("/media/in.mkv")).await.unwrap();
    // Wait until the job is running before cancelling.
    loop {
        let event = rx.recv().await.unwrap();
        if event.job_id == id && event.payload == JobPayload::Started {
            break;
        }
    }
    service.cancel(id).await.unwrap();
    service.cancel(id).await.unwrap();

    let events = events_for(&mut rx, id).await;
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert_eq!(
        events.last(),
        Some(&JobPayload::Terminal(Err(ExitError::Cancelled)))
    );
    assert_eq!(
        store.get(id).await.unwrap().unwrap().status,
        ConversionStatus::Cancelled
    );
}

#[tokio::test]
async fn probe_failure_is_returned_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = start(dir.path(), ENCODER_OK, FixedProber(None)).await;

    let err = service.submit(request("/media/in.mkv")).await.unwrap_err();
    assert_matches!(err, Error::VideoStreamNotFound);
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn explicit_picture_subtitle_uses_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let mut clip = ten_second_clip();
    let mut sub = rh_probe::TrackDescriptor::new(rh_probe::TrackKind::Subtitle, 0);
    sub.subtitle_kind = rh_probe::SubtitleKind::Picture;
    clip.subtitle.push(sub);
    let (service, store) = start(dir.path(), ENCODER_OK, FixedProber(Some(clip))).await;

    let id = service
        .submit(ConversionRequest {
            input: PathBuf::from("/media/in.mkv"),
            preferences: Preferences {
                subtitle: SelectionPreference {
                    explicit_index: Some(0),
                    ..Default::default()
                },
                ..Default::default()
            },
            output: None,
        })
        .await
        .unwrap();
    let command = store.get(id).await.unwrap().unwrap().command.unwrap();
    assert!(command.contains("overlay"), "{command}");
}
