// src/camera.rs
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;
use log::{debug, error, info, warn};
use nokhwa::{
    pixel_format::{RgbFormat, YuyvFormat},
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera, NokhwaError,
};

use crate::config::AppConfig;

#[derive(Debug)]
pub enum CameraThreadMsg {
    Frame(Arc<RgbImage>),
    Error(String),
}

/// What to ask the camera for; the driver picks the closest supported mode.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub index: CameraIndex,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl From<&AppConfig> for CaptureSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            index: CameraIndex::Index(config.camera_index),
            width: config.requested_width,
            height: config.requested_height,
            fps: config.requested_fps,
        }
    }
}

pub fn start_camera_thread(
    settings: CaptureSettings,
    msg_sender: Sender<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) -> JoinHandle<()> {
    info!("Spawning camera capture thread.");
    thread::spawn(move || {
        camera_capture_loop(settings, msg_sender, stop_signal, ctx);
    })
}

fn report_error(msg_sender: &Sender<CameraThreadMsg>, ctx: &egui::Context, error_msg: String) {
    error!("{}", error_msg);
    let _ = msg_sender.send(CameraThreadMsg::Error(error_msg));
    ctx.request_repaint();
}

fn camera_capture_loop(
    settings: CaptureSettings,
    msg_sender: Sender<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) {
    info!("Camera capture loop started for {:?}.", settings.index);
    let requested_cam_format = CameraFormat::new(
        Resolution::new(settings.width, settings.height),
        FrameFormat::YUYV,
        settings.fps,
    );
    let requested_format =
        RequestedFormat::new::<YuyvFormat>(RequestedFormatType::Closest(requested_cam_format));

    let mut camera = match Camera::new(settings.index.clone(), requested_format) {
        Ok(cam) => cam,
        Err(err) => {
            report_error(&msg_sender, &ctx, format!("Failed to open camera: {}", err));
            return;
        }
    };
    info!("Camera format: {:?}", camera.camera_format());

    if let Err(err) = camera.open_stream() {
        report_error(&msg_sender, &ctx, format!("Failed to open stream: {}", err));
        return;
    }
    info!("Camera stream opened.");

    // Read failures are skipped; the loop keeps polling until told to stop.
    while !stop_signal.load(Ordering::Relaxed) {
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(NokhwaError::ReadFrameError(msg)) => {
                warn!("Camera frame read failed: {}", msg);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(err) => {
                warn!("Failed to capture frame: {}", err);
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        };
        let decoded = match frame.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(err) => {
                warn!("Failed to decode frame to RGB: {}", err);
                continue;
            }
        };
        match msg_sender.try_send(CameraThreadMsg::Frame(Arc::new(decoded))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Tracking is behind, dropping camera frame."),
            Err(TrySendError::Disconnected(_)) => {
                info!("Tracking thread receiver disconnected. Stopping camera loop.");
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        error!("Failed to stop camera stream cleanly: {}", e);
    }
    info!("Camera capture loop finished.");
}
