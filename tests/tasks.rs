mod common;

use camwarden::db::models::{Camera, CameraState, EventKind, NewEvent};
use camwarden::db::{CameraDirectory, MediaStore};
use camwarden::drivers::HealthStatus;
use camwarden::error::Error;
use camwarden::messaging::ALERT_TASK;
use camwarden::tasks::motion::MotionOutcome;
use camwarden::tasks::{reset_abandoned_recordings, AlertTask, HealthTask, MotionTask};
use camwarden::worker::TaskHandler;
use common::{eventually, Harness};
use std::sync::atomic::Ordering;
use std::time::Duration;

const JUST_NOW: Duration = Duration::ZERO;

#[tokio::test]
async fn stale_motion_is_ignored() {
    let h = Harness::new();
    let camera = h.camera("Fake").await;
    let event = h.motion(&camera, Duration::from_secs(61)).await;

    let outcome = MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::Stale);
    assert!(h.queue.jobs().is_empty());
    assert!(h.device.calls().is_empty());
}

#[tokio::test]
async fn fresh_motion_raises_an_alert() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let outcome = MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::RecordingDisabled);
    let jobs = h.queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, ALERT_TASK);
    assert_eq!(jobs[0].1["id"], event.id.to_string());
    assert!(h.device.calls().is_empty());
}

#[tokio::test]
async fn recent_alert_suppresses_another() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    h.store.put_camera(camera.clone()).await;
    h.backdated(NewEvent::alert(camera.id, None), Duration::from_secs(120))
        .await;
    let event = h.motion(&camera, JUST_NOW).await;

    MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn old_alert_does_not_suppress() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    h.store.put_camera(camera.clone()).await;
    h.backdated(NewEvent::alert(camera.id, None), Duration::from_secs(301))
        .await;
    let event = h.motion(&camera, JUST_NOW).await;

    MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(h.queue.tasks(), vec![ALERT_TASK.to_string()]);
}

#[tokio::test]
async fn alerts_switched_off() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let outcome = MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::RecordingDisabled);
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn enqueue_failure_does_not_fail_the_job() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    h.store.put_camera(camera.clone()).await;
    h.queue.set_failing(true);
    let event = h.motion(&camera, JUST_NOW).await;

    let outcome = MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::RecordingDisabled);
}

#[tokio::test]
async fn records_while_motion_continues() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let mut context = h.task_context();
    context.settings.recording_duration = Duration::from_millis(300);
    let outcome = MotionTask::new(context).handle(&event).await.unwrap();

    let MotionOutcome::Recorded(Some(video)) = outcome else {
        panic!("expected a recording, got {:?}", outcome);
    };
    assert_eq!(h.device.calls(), vec!["record", "stop"]);

    let recording = h.latest(&camera, EventKind::Recording).await.unwrap();
    assert_eq!(recording.video_id, Some(video.id));
    let stored = h.store.get_video(&video.id).await.unwrap().unwrap();
    assert_eq!(stored.duration, video.duration);

    let camera = h.store.get(&camera.id).await.unwrap().unwrap();
    assert_eq!(camera.state, CameraState::Ok);
}

#[tokio::test]
async fn disabling_the_camera_stops_the_recording() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let task = MotionTask::new(h.task_context());
    let store = h.store.clone();
    let camera_id = camera.id;
    let disable = async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set_disabled(&camera_id, true).await.unwrap();
    };
    let (outcome, _) = tokio::time::timeout(
        Duration::from_secs(5),
        futures_util::future::join(task.handle(&event), disable),
    )
    .await
    .expect("recording should stop once the camera is disabled");

    assert!(matches!(outcome.unwrap(), MotionOutcome::Recorded(Some(_))));
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );
}

#[tokio::test]
async fn worker_shutdown_stops_the_recording() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let context = h.task_context();
    let shutdown = context.shutdown.clone();
    let task = MotionTask::new(context);
    let stop = async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    };
    let (outcome, _) = tokio::time::timeout(
        Duration::from_secs(5),
        futures_util::future::join(task.handle(&event), stop),
    )
    .await
    .expect("recording should stop on shutdown");

    assert!(matches!(outcome.unwrap(), MotionOutcome::Recorded(Some(_))));
    assert_eq!(h.device.calls(), vec!["record", "stop"]);
    assert!(h.latest(&camera, EventKind::Recording).await.is_some());
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );
}

#[tokio::test]
async fn aborted_recording_job_frees_the_camera() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let context = h.task_context();
    let running = tokio::spawn({
        let task = MotionTask::new(context.clone());
        async move { task.handle(&event).await }
    });
    let (harness, recorder) = (&h, &camera);
    eventually(move || async move {
        harness.store.get(&recorder.id).await.unwrap().unwrap().state == CameraState::Recording
    })
    .await;

    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());
    eventually(move || async move {
        harness.store.get(&recorder.id).await.unwrap().unwrap().state == CameraState::Ok
    })
    .await;

    // Same locks as the aborted job, shorter recordings
    let mut quick = context;
    quick.settings.recording_duration = Duration::from_millis(300);
    let next = h.motion(&camera, JUST_NOW).await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), MotionTask::new(quick).handle(&next))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, MotionOutcome::Recorded(Some(_))));
}

#[tokio::test]
async fn abandoned_recordings_are_reset() {
    let h = Harness::new();
    let mut stuck = h.camera("Fake").await;
    stuck.state = CameraState::Recording;
    h.store.put_camera(stuck.clone()).await;
    let mut idle = Camera::new("garage", "Fake", "F1", "http://127.0.0.1:9/");
    idle.state = CameraState::Unreachable;
    h.store.put_camera(idle.clone()).await;

    assert_eq!(reset_abandoned_recordings(h.store.as_ref()).await.unwrap(), 1);
    assert_eq!(
        h.store.get(&stuck.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );
    assert_eq!(
        h.store.get(&idle.id).await.unwrap().unwrap().state,
        CameraState::Unreachable
    );
}

#[tokio::test]
async fn camera_already_recording_is_left_alone() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.state = CameraState::Recording;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let outcome = MotionTask::new(h.task_context()).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::AlreadyRecording);
    assert!(h.device.calls().is_empty());
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Recording
    );
}

#[tokio::test]
async fn held_lock_means_already_recording() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let context = h.task_context();
    let _held = context.locks.try_acquire(&camera.id).unwrap();
    let outcome = MotionTask::new(context).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::AlreadyRecording);
    assert!(h.device.calls().is_empty());
}

#[tokio::test]
async fn failed_stop_still_resets_state() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    h.device.fail_stop.store(true, Ordering::SeqCst);
    let event = h.motion(&camera, JUST_NOW).await;

    let mut context = h.task_context();
    context.settings.recording_duration = Duration::from_millis(100);
    let outcome = MotionTask::new(context).handle(&event).await.unwrap();

    assert_eq!(outcome, MotionOutcome::Recorded(None));
    assert!(h.latest(&camera, EventKind::Recording).await.is_none());
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );
}

#[tokio::test]
async fn unsupported_camera_resets_state() {
    let h = Harness::new();
    let mut camera = h.camera("Acme").await;
    camera.alerts = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let err = MotionTask::new(h.task_context())
        .handle(&event)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::UnsupportedDevice(_))
    ));
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );
}

#[tokio::test]
async fn motion_job_payload_is_an_event() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.record = false;
    h.store.put_camera(camera.clone()).await;
    let event = h.motion(&camera, JUST_NOW).await;

    let task = MotionTask::new(h.task_context());
    task.run(serde_json::to_value(&event).unwrap()).await.unwrap();
    assert!(task.run(serde_json::json!({"bogus": true})).await.is_err());

    assert_eq!(h.queue.tasks(), vec![ALERT_TASK.to_string()]);
}

#[tokio::test]
async fn alert_carries_the_image() {
    let h = Harness::new();
    let camera = h.camera("Fake").await;
    let motion = h.motion(&camera, JUST_NOW).await;

    AlertTask::new(h.task_context())
        .run(serde_json::to_value(&motion).unwrap())
        .await
        .unwrap();

    let alert = h.latest(&camera, EventKind::Alert).await.unwrap();
    assert_eq!(alert.image_id, motion.image_id);
    assert_eq!(alert.camera_id, camera.id);
}

#[tokio::test]
async fn unreachable_streak_grows_until_recovery() {
    let h = Harness::new();
    let camera = h.camera("Fake").await;
    let task = HealthTask::new(h.task_context());
    h.device.unreachable.store(true, Ordering::SeqCst);

    for expected in 1..=3 {
        assert_eq!(task.check(&camera.id).await.unwrap(), HealthStatus::Unreachable);
        let event = h.latest(&camera, EventKind::Unreachable).await.unwrap();
        assert_eq!(event.count, expected);
        assert!(event.details.is_some());
    }
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Unreachable
    );

    h.device.unreachable.store(false, Ordering::SeqCst);
    assert_eq!(task.check(&camera.id).await.unwrap(), HealthStatus::Ok);
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Ok
    );

    // A fresh outage starts counting again
    h.device.unreachable.store(true, Ordering::SeqCst);
    task.check(&camera.id).await.unwrap();
    assert_eq!(
        h.latest(&camera, EventKind::Unreachable).await.unwrap().count,
        1
    );
}

#[tokio::test]
async fn health_check_leaves_recording_cameras_recording() {
    let h = Harness::new();
    let mut camera = h.camera("Fake").await;
    camera.state = CameraState::Recording;
    h.store.put_camera(camera.clone()).await;

    let status = HealthTask::new(h.task_context()).check(&camera.id).await.unwrap();

    assert_eq!(status, HealthStatus::Ok);
    assert_eq!(
        h.store.get(&camera.id).await.unwrap().unwrap().state,
        CameraState::Recording
    );
}
