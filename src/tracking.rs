// src/tracking.rs
//! Background hand tracking: latest camera frame -> detector -> finger
//! classifier -> annotated frame for the UI.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use egui::ColorImage;
use image::{Rgb, RgbImage};
use imageproc::drawing;
use log::{debug, error, info, warn};

use crate::{
    camera::CameraThreadMsg,
    detector::HandDetector,
    landmarks::{self, FingerStates, LandmarkSet, HAND_CONNECTIONS},
};

// --- Constants ---
// Short enough that the stop signal is noticed promptly.
const FRAME_WAIT: Duration = Duration::from_millis(50);
const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const JOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TIP_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

// --- Message from Tracking Thread to UI Thread ---
#[derive(Debug)]
pub enum TrackingThreadMsg {
    /// One processed frame. `fingers` is `None` when no hand was found.
    Processed {
        frame: Arc<ColorImage>,
        fingers: Option<FingerStates>,
    },
    Error(String),
}

// --- Tracking Thread ---
pub fn start_tracking_thread<F, D>(
    ui_sender: Sender<TrackingThreadMsg>,
    camera_receiver: Receiver<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
    make_detector: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Result<D> + Send + 'static,
    D: HandDetector + 'static,
{
    info!("Spawning hand tracking thread");
    thread::spawn(move || {
        // Model loading is slow, keep it off the UI thread.
        let mut detector = match make_detector() {
            Ok(detector) => detector,
            Err(e) => {
                let error_msg = format!("Failed to load hand detector: {:#}", e);
                error!("{}", error_msg);
                let _ = ui_sender.send(TrackingThreadMsg::Error(error_msg));
                ctx.request_repaint();
                return;
            }
        };
        tracking_loop(&mut detector, ui_sender, camera_receiver, stop_signal, ctx);
    })
}

pub(crate) fn tracking_loop<D: HandDetector + ?Sized>(
    detector: &mut D,
    ui_sender: Sender<TrackingThreadMsg>,
    camera_receiver: Receiver<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) {
    info!("Tracking loop started.");

    while !stop_signal.load(Ordering::Relaxed) {
        // --- Wait for a frame, then drain to the newest one ---
        let first = match camera_receiver.recv_timeout(FRAME_WAIT) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("Camera thread disconnected. Stopping tracking loop.");
                break;
            }
        };

        // Only the newest frame is worth processing.
        let mut latest_frame: Option<Arc<RgbImage>> = None;
        let mut pending = Some(first);
        while let Some(msg) = pending.take() {
            match msg {
                CameraThreadMsg::Frame(frame) => latest_frame = Some(frame),
                CameraThreadMsg::Error(err) => {
                    warn!("Received error from camera thread: {}", err);
                    let _ = ui_sender.try_send(TrackingThreadMsg::Error(format!("Camera Error: {}", err)));
                    ctx.request_repaint();
                }
            }
            pending = match camera_receiver.try_recv() {
                Ok(msg) => Some(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            };
        }

        let Some(frame) = latest_frame else {
            continue;
        };

        // --- Detect + classify ---
        let started = Instant::now();
        let (display_image, fingers) = process_frame(detector, &frame, &ui_sender);
        let color_image = {
            let size = [display_image.width() as usize, display_image.height() as usize];
            ColorImage::from_rgb(size, display_image.as_raw())
        };

        // --- Send to UI, dropping the frame if the UI is behind ---
        match ui_sender.try_send(TrackingThreadMsg::Processed {
            frame: Arc::new(color_image),
            fingers,
        }) {
            Ok(()) => ctx.request_repaint(),
            Err(TrySendError::Full(_)) => warn!("UI channel full. Dropping tracked frame."),
            Err(TrySendError::Disconnected(_)) => {
                info!("UI receiver disconnected. Stopping tracking loop.");
                break;
            }
        }
        debug!(
            "Tracked frame in {:?}: {:?}",
            started.elapsed(),
            fingers.map(|f| f.count())
        );
    }

    info!("Tracking loop finished.");
}

/// Runs detection and classification, returning the annotated frame.
/// A detector failure counts as "no hand" for this frame.
fn process_frame<D: HandDetector + ?Sized>(
    detector: &mut D,
    frame: &RgbImage,
    ui_sender: &Sender<TrackingThreadMsg>,
) -> (RgbImage, Option<FingerStates>) {
    let mut display_image = frame.clone();
    let hand = match detector.detect(frame) {
        Ok(hand) => hand,
        Err(e) => {
            warn!("Hand detection failed: {:#}", e);
            let _ = ui_sender.try_send(TrackingThreadMsg::Error(format!("Detection failed: {}", e)));
            None
        }
    };
    if let Some(hand) = &hand {
        draw_hand(&mut display_image, hand);
    }
    (display_image, landmarks::classify(hand.as_ref()))
}

// --- Overlay ---
fn draw_hand(image: &mut RgbImage, hand: &LandmarkSet) {
    let points = hand.points();
    for &(a, b) in HAND_CONNECTIONS.iter() {
        drawing::draw_line_segment_mut(
            image,
            (points[a].x, points[a].y),
            (points[b].x, points[b].y),
            BONE_COLOR,
        );
    }
    for (index, point) in points.iter().enumerate() {
        let color = if landmarks::TIP_IDS.contains(&index) {
            TIP_COLOR
        } else {
            JOINT_COLOR
        };
        let center = (point.x.round() as i32, point.y.round() as i32);
        drawing::draw_filled_circle_mut(image, center, 4, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::tests::{fist, fist_with_fingers, open_hand};
    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use std::collections::VecDeque;

    /// Replays a fixed list of detection results.
    struct ScriptedDetector {
        script: VecDeque<Result<Option<LandmarkSet>>>,
    }

    impl HandDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn frame() -> Arc<RgbImage> {
        Arc::new(RgbImage::new(640, 480))
    }

    fn next_processed(rx: &Receiver<TrackingThreadMsg>) -> (Arc<ColorImage>, Option<FingerStates>) {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).expect("tracking output") {
                TrackingThreadMsg::Processed { frame, fingers } => return (frame, fingers),
                TrackingThreadMsg::Error(_) => continue,
            }
        }
    }

    #[test]
    fn test_tracking_emits_counts_and_no_hand() {
        let (cam_tx, cam_rx) = bounded(4);
        let (ui_tx, ui_rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let mut detector = ScriptedDetector {
            script: VecDeque::from(vec![
                Ok(Some(open_hand())),
                Ok(None),
                Ok(Some(fist())),
                Ok(Some(fist_with_fingers(3))),
            ]),
        };

        let worker_stop = stop.clone();
        let handle = thread::spawn(move || {
            tracking_loop(&mut detector, ui_tx, cam_rx, worker_stop, egui::Context::default());
        });

        let mut counts = Vec::new();
        for _ in 0..4 {
            cam_tx.send(CameraThreadMsg::Frame(frame())).unwrap();
            let (image, fingers) = next_processed(&ui_rx);
            assert_eq!(image.size, [640, 480]);
            counts.push(fingers.map(|f| f.count()));
        }
        assert_eq!(counts, vec![Some(5), None, Some(0), Some(3)]);

        drop(cam_tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_detector_error_reported_as_no_hand() {
        let (cam_tx, cam_rx) = bounded(4);
        let (ui_tx, ui_rx) = bounded(4);
        let mut detector = ScriptedDetector {
            script: VecDeque::from(vec![Err(anyhow!("inference failed"))]),
        };
        let handle = thread::spawn(move || {
            tracking_loop(
                &mut detector,
                ui_tx,
                cam_rx,
                Arc::new(AtomicBool::new(false)),
                egui::Context::default(),
            );
        });

        cam_tx.send(CameraThreadMsg::Frame(frame())).unwrap();
        match ui_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            TrackingThreadMsg::Error(msg) => assert!(msg.contains("inference failed")),
            other => panic!("expected error first, got {:?}", other),
        }
        let (_, fingers) = next_processed(&ui_rx);
        assert_eq!(fingers, None);

        drop(cam_tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_camera_error_relayed() {
        let (cam_tx, cam_rx) = bounded(4);
        let (ui_tx, ui_rx) = bounded(4);
        let mut detector = ScriptedDetector { script: VecDeque::new() };
        cam_tx
            .send(CameraThreadMsg::Error("Failed to open camera".to_string()))
            .unwrap();
        drop(cam_tx);

        tracking_loop(
            &mut detector,
            ui_tx,
            cam_rx,
            Arc::new(AtomicBool::new(false)),
            egui::Context::default(),
        );
        match ui_rx.try_recv().unwrap() {
            TrackingThreadMsg::Error(msg) => assert_eq!(msg, "Camera Error: Failed to open camera"),
            other => panic!("unexpected message {:?}", other),
        }
        assert!(ui_rx.try_recv().is_err());
    }

    #[test]
    fn test_start_thread_reports_load_failure() {
        let (_cam_tx, cam_rx) = bounded::<CameraThreadMsg>(1);
        let (ui_tx, ui_rx) = bounded(1);
        let handle = start_tracking_thread(
            ui_tx,
            cam_rx,
            Arc::new(AtomicBool::new(false)),
            egui::Context::default(),
            || -> Result<ScriptedDetector> { Err(anyhow!("model missing")) },
        );
        handle.join().unwrap();
        match ui_rx.try_recv().unwrap() {
            TrackingThreadMsg::Error(msg) => assert!(msg.contains("model missing")),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_stop_signal_ends_loop() {
        let (_cam_tx, cam_rx) = bounded::<CameraThreadMsg>(1);
        let (ui_tx, _ui_rx) = bounded(1);
        let mut detector = ScriptedDetector { script: VecDeque::new() };
        let stop = Arc::new(AtomicBool::new(true));
        tracking_loop(&mut detector, ui_tx, cam_rx, stop, egui::Context::default());
    }
}
