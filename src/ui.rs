// src/ui.rs
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use chrono::Utc;
use crossbeam_channel::{Receiver, TryRecvError};
use egui::{
    Align, Align2, Color32, FontFamily, FontId, ImageData, Layout, TextureHandle, TextureOptions, Vec2,
};
use log::{debug, error, info, warn};

use crate::{
    camera::{self, CaptureSettings},
    config::AppConfig,
    detector::HandLandmarkModel,
    devices::{Device, DeviceBoard, DeviceStates},
    landmarks::FingerStates,
    license::{self, LicenseError, LicenseRecord, LicenseStore, Remaining},
    tracking::{self, TrackingThreadMsg},
};

// --- Constants ---
const FPS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const LICENSE_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const CAMERA_CHANNEL_CAPACITY: usize = 2;
const UI_CHANNEL_CAPACITY: usize = 4;
const CUSTOM_FONT_NAME: &str = "custom_font";

// --- Capture Pipeline ---

/// Camera and tracking threads plus the channel the UI drains every tick.
struct Pipeline {
    cam_thread_handle: Option<JoinHandle<()>>,
    cam_stop_signal: Arc<AtomicBool>,
    track_thread_handle: Option<JoinHandle<()>>,
    track_stop_signal: Arc<AtomicBool>,
    rx: Receiver<TrackingThreadMsg>,
}

impl Pipeline {
    fn start(config: &AppConfig, ctx: &egui::Context) -> Self {
        let (cam_tx, cam_rx) = crossbeam_channel::bounded(CAMERA_CHANNEL_CAPACITY);
        let (ui_tx, ui_rx) = crossbeam_channel::bounded(UI_CHANNEL_CAPACITY);
        let cam_stop_signal = Arc::new(AtomicBool::new(false));
        let track_stop_signal = Arc::new(AtomicBool::new(false));

        let cam_thread_handle = camera::start_camera_thread(
            CaptureSettings::from(config),
            cam_tx,
            cam_stop_signal.clone(),
            ctx.clone(),
        );

        let model_path = config.model_path.clone();
        let presence_threshold = config.presence_threshold;
        let track_thread_handle = tracking::start_tracking_thread(
            ui_tx,
            cam_rx,
            track_stop_signal.clone(),
            ctx.clone(),
            move || HandLandmarkModel::new(&model_path, presence_threshold),
        );

        Self {
            cam_thread_handle: Some(cam_thread_handle),
            cam_stop_signal,
            track_thread_handle: Some(track_thread_handle),
            track_stop_signal,
            rx: ui_rx,
        }
    }

    fn stop(&mut self) {
        // Signal both threads before joining either.
        self.cam_stop_signal.store(true, Ordering::Relaxed);
        self.track_stop_signal.store(true, Ordering::Relaxed);

        if let Some(handle) = self.cam_thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("Error joining camera thread: {:?}", e);
            } else {
                info!("Camera thread joined successfully.");
            }
        }
        if let Some(handle) = self.track_thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("Error joining tracking thread: {:?}", e);
            } else {
                info!("Tracking thread joined successfully.");
            }
        }
    }
}

// --- eframe App Struct ---
pub struct SmartHomeUI {
    config: AppConfig,
    pipeline: Option<Pipeline>,

    texture: Option<TextureHandle>,
    texture_size: Option<Vec2>,

    board: DeviceBoard,
    last_fingers: Option<FingerStates>,
    notification: String,
    tracking_error: Option<String>,

    // --- License state, re-read from disk every LICENSE_REFRESH_INTERVAL ---
    license_store: LicenseStore,
    license: Option<LicenseRecord>,
    license_valid: bool,
    last_license_check: Option<Instant>,
    license_panel_open: bool,
    license_key_input: String,
    license_message: Option<(String, bool)>,

    // --- Fields for FPS calculation ---
    last_fps_update_time: Instant,
    frames_since_last_update: u32,
    last_calculated_fps: f32,
}

impl SmartHomeUI {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        info!("Initializing SmartHomeUI");
        install_fonts(&cc.egui_ctx, config.font_path.as_deref());

        let license_store = LicenseStore::new(config.license_path.clone(), license::machine_code());
        info!("Machine code: {}", license_store.machine_code());
        let pipeline = Some(Pipeline::start(&config, &cc.egui_ctx));

        let mut app = Self {
            board: DeviceBoard::new(config.no_hand_timeout()),
            config,
            pipeline,
            texture: None,
            texture_size: None,
            last_fingers: None,
            notification: "Waiting for a hand...".to_string(),
            tracking_error: None,
            license_store,
            license: None,
            license_valid: false,
            last_license_check: None,
            license_panel_open: false,
            license_key_input: String::new(),
            license_message: None,
            last_fps_update_time: Instant::now(),
            frames_since_last_update: 0,
            last_calculated_fps: 0.0,
        };
        app.refresh_license();
        app
    }

    fn update_fps_counter(&mut self) {
        self.frames_since_last_update += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update_time);

        if elapsed >= FPS_UPDATE_INTERVAL {
            let elapsed_secs = elapsed.as_secs_f32();
            self.last_calculated_fps = if elapsed_secs > 0.0 {
                self.frames_since_last_update as f32 / elapsed_secs
            } else {
                f32::INFINITY
            };
            self.frames_since_last_update = 0;
            self.last_fps_update_time = now;
        }
    }

    fn refresh_license(&mut self) {
        let now = Utc::now();
        self.last_license_check = Some(Instant::now());
        match self.license_store.load_or_issue_trial(now) {
            Ok(record) => {
                let valid = license::is_valid(&record, now);
                if valid != self.license_valid {
                    info!("License {} is now {}.", record.license_type, if valid { "valid" } else { "invalid" });
                }
                self.license_valid = valid;
                self.license = Some(record);
            }
            Err(e) => {
                error!("License check failed: {:#}", e);
                self.license_valid = false;
                self.license = None;
            }
        }
    }

    fn license_status_text(&self) -> String {
        match &self.license {
            None => "No license".to_string(),
            Some(record) => match license::remaining(record, Utc::now()) {
                Remaining::Unbounded => "License: lifetime".to_string(),
                remaining => format!("License time left: {}", remaining),
            },
        }
    }

    fn activate_license(&mut self) {
        let key = self.license_key_input.trim().to_string();
        match self.license_store.activate(&key, Utc::now()) {
            Ok(record) => {
                self.license_message = Some((format!("Activated license: {}", record.license_type), true));
                self.license_panel_open = false;
                self.refresh_license();
            }
            Err(LicenseError::UnknownTier(_)) => {
                warn!("Rejected license key {:?}", key);
                self.license_message = Some(("Invalid key!".to_string(), false));
            }
            Err(e) => {
                error!("License activation failed: {}", e);
                self.license_message = Some((format!("Activation failed: {}", e), false));
            }
        }
    }

    fn start_capture(&mut self, ctx: &egui::Context) {
        if self.pipeline.is_none() {
            info!("Starting capture.");
            self.tracking_error = None;
            self.pipeline = Some(Pipeline::start(&self.config, ctx));
        }
    }

    fn stop_capture(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            info!("Stopping capture.");
            pipeline.stop();
        }
    }

    fn apply_reading(&mut self, fingers: Option<FingerStates>) {
        self.last_fingers = fingers;
        // Gesture control is gated on the license; manual toggles are not.
        if self.board.apply_if_licensed(fingers, self.license_valid, Instant::now()) {
            self.notification = describe_states(self.board.states());
        }
    }

    fn show_frame(&mut self, ctx: &egui::Context, frame: Arc<egui::ColorImage>) {
        let size = frame.size;
        let frame_size_vec = Vec2::new(size[0] as f32, size[1] as f32);
        match self.texture {
            Some(ref mut texture) => {
                if self.texture_size != Some(frame_size_vec) {
                    debug!("Texture size changed to: {:?}", frame_size_vec);
                    self.texture_size = Some(frame_size_vec);
                }
                texture.set(ImageData::Color(frame), TextureOptions::LINEAR);
            }
            None => {
                info!("Creating texture with size: {:?}", size);
                self.texture = Some(ctx.load_texture("hand_stream", ImageData::Color(frame), TextureOptions::LINEAR));
                self.texture_size = Some(frame_size_vec);
            }
        }
    }

    fn drain_tracking_messages(&mut self, ctx: &egui::Context) {
        let Some(rx) = self.pipeline.as_ref().map(|p| p.rx.clone()) else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(TrackingThreadMsg::Processed { frame, fingers }) => {
                    self.show_frame(ctx, frame);
                    self.apply_reading(fingers);
                }
                Ok(TrackingThreadMsg::Error(err)) => self.tracking_error = Some(err),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    error!("Tracking thread disconnected!");
                    if self.tracking_error.is_none() {
                        self.tracking_error = Some("Tracking thread stopped unexpectedly.".to_string());
                    }
                    self.stop_capture();
                    break;
                }
            }
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (quit_capture, close_app) =
            ctx.input(|i| (i.key_pressed(egui::Key::Q), i.key_pressed(egui::Key::Delete)));
        if quit_capture {
            self.stop_capture();
        }
        if close_app {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn license_bar(&mut self, ui: &mut egui::Ui) {
        let status = self.license_status_text();
        if self.license_valid {
            ui.label(egui::RichText::new(status).strong());
        } else {
            ui.colored_label(Color32::RED, "License expired, gesture control disabled");
        }

        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            if ui.button("Manage license").clicked() {
                self.license_panel_open = !self.license_panel_open;
                self.license_key_input.clear();
                self.license_message = None;
            }
            if self.license_panel_open {
                if ui.button("Activate").clicked() {
                    self.activate_license();
                }
                ui.add(egui::TextEdit::singleline(&mut self.license_key_input).desired_width(120.0));
                ui.label(format!("Machine code: {}", self.license_store.machine_code()));
            }
            if let Some((msg, ok)) = &self.license_message {
                let color = if *ok { Color32::GREEN } else { Color32::RED };
                ui.colored_label(color, msg.as_str());
            }
        });
    }

    fn device_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Devices");
        ui.separator();
        let states = self.board.states();
        egui::Grid::new("device_grid")
            .num_columns(3)
            .spacing([16.0, 12.0])
            .striped(true)
            .show(ui, |ui| {
                for device in Device::ALL {
                    let on = states.get(device);
                    ui.label(egui::RichText::new(device.label()).strong());
                    if toggle_switch(ui, on).clicked() {
                        self.board.toggle(device);
                        self.notification = format!("{}: {}", device.label(), on_off(!on));
                    }
                    let color = if on { Color32::from_rgb(0, 99, 236) } else { Color32::GRAY };
                    ui.colored_label(color, on_off(on));
                    ui.end_row();
                }
            });
        ui.add_space(12.0);
        match self.board.last_count() {
            Some(count) => ui.label(format!("Last hand: {} raised", count)),
            None => ui.label("No hand seen yet"),
        };
        ui.label("Raise 1-5 fingers to switch a device on.");
        ui.small("1 LED, 2 Fan, 3 Air conditioner, 4 TV, 5 Stove");
    }

    fn video_view(&mut self, ui: &mut egui::Ui) {
        if let Some(err) = &self.tracking_error {
            ui.colored_label(Color32::RED, format!("Tracking Status: {}", err));
        }

        match (&self.texture, self.texture_size) {
            (Some(texture), Some(tex_size)) => {
                let aspect_ratio = if tex_size.y > 0.0 { tex_size.x / tex_size.y } else { 1.0 };
                let available_width = ui.available_width();
                let available_height = ui.available_height() - 30.0;
                let mut image_width = available_width;
                let mut image_height = available_width / aspect_ratio;
                if image_height > available_height {
                    image_height = available_height;
                    image_width = available_height * aspect_ratio;
                }
                ui.with_layout(Layout::top_down(Align::Center), |ui| {
                    let response = ui.add(
                        egui::Image::new(texture)
                            .max_width(image_width)
                            .max_height(image_height)
                            .maintain_aspect_ratio(true)
                            .corner_radius(5.0),
                    );
                    if let Some(fingers) = self.last_fingers {
                        draw_count_badge(ui, response.rect, fingers.count());
                    }
                });
            }
            _ if self.pipeline.is_some() && self.tracking_error.is_none() => {
                ui.with_layout(Layout::top_down(Align::Center), |ui| {
                    ui.add_space(ui.available_height() / 3.0);
                    ui.spinner();
                    ui.label("Initializing stream...");
                });
            }
            _ => {}
        }

        if self.pipeline.is_none() {
            ui.horizontal(|ui| {
                ui.label("Capture stopped.");
                if ui.button("Start camera").clicked() {
                    self.start_capture(ui.ctx());
                }
            });
        }
    }
}

// --- eframe App Implementation ---
impl eframe::App for SmartHomeUI {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_fps_counter();
        // Expiry is time based, so check it even when nothing else happens.
        if self
            .last_license_check
            .map_or(true, |t| t.elapsed() >= LICENSE_REFRESH_INTERVAL)
        {
            self.refresh_license();
        }
        ctx.request_repaint_after(LICENSE_REFRESH_INTERVAL);

        // --- Input and pipeline messages ---
        self.handle_keys(ctx);
        self.drain_tracking_messages(ctx);
        // Hold timeout also has to fire when capture is stopped.
        if self.board.tick(Instant::now()) {
            self.notification = describe_states(self.board.states());
        }

        // --- Define the UI ---

        // --- Top Panel (Menu Bar + License) ---
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.add_space(16.0);
                egui::widgets::global_theme_preference_buttons(ui);
                ui.add_space(16.0);
                self.license_bar(ui);
            });
        });

        // --- Bottom Panel (Notification + FPS Counter) ---
        egui::TopBottomPanel::bottom("bottom_panel").resizable(false).show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(self.notification.as_str());
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    ui.label(format!("UI FPS: {:.1}", self.last_calculated_fps));
                    ui.add_space(10.0);
                    if let Some(size) = self.texture_size {
                        ui.label(format!("Cam Res: {}x{}", size.x, size.y));
                    }
                    ui.add_space(10.0);
                    ui.label("Q: stop camera   Del: exit");
                });
            });
        });

        // --- Side Panel (Devices) ---
        egui::SidePanel::left("device_panel")
            .resizable(false)
            .default_width(280.0)
            .show(ctx, |ui| self.device_panel(ui));

        // --- Central Panel (Webcam Image) ---
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("AI Smart Home Control");
            ui.separator();
            self.video_view(ui);
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("Exit requested. Stopping threads...");
        self.stop_capture();
    }
}

// --- Helpers ---

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

fn describe_states(states: DeviceStates) -> String {
    if states.on_count() == 0 {
        return "All devices OFF".to_string();
    }
    Device::ALL
        .into_iter()
        .filter(|&d| states.get(d))
        .map(|d| format!("{}: ON", d.label()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Puts the configured font in front of egui's defaults; keeps the defaults
/// when it cannot be read.
fn install_fonts(ctx: &egui::Context, font_path: Option<&Path>) {
    let Some(path) = font_path else {
        return;
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to load font {}: {}. Using default fonts.", path.display(), e);
            return;
        }
    };
    let mut fonts = egui::FontDefinitions::default();
    fonts.font_data.insert(
        CUSTOM_FONT_NAME.to_owned(),
        Arc::new(egui::FontData::from_owned(bytes)),
    );
    for family in [FontFamily::Proportional, FontFamily::Monospace] {
        fonts
            .families
            .entry(family)
            .or_default()
            .insert(0, CUSTOM_FONT_NAME.to_owned());
    }
    ctx.set_fonts(fonts);
    info!("Loaded font {}", path.display());
}

fn toggle_switch(ui: &mut egui::Ui, on: bool) -> egui::Response {
    let desired_size = ui.spacing().interact_size.y * egui::vec2(2.0, 1.0);
    let (rect, response) = ui.allocate_exact_size(desired_size, egui::Sense::click());
    if ui.is_rect_visible(rect) {
        let how_on = ui.ctx().animate_bool(response.id, on);
        let visuals = ui.style().interact_selectable(&response, on);
        let rect = rect.expand(visuals.expansion);
        let radius = 0.5 * rect.height();
        ui.painter().rect_filled(rect, radius, visuals.bg_fill);
        let circle_x = egui::lerp((rect.left() + radius)..=(rect.right() - radius), how_on);
        let center = egui::pos2(circle_x, rect.center().y);
        ui.painter().circle(center, 0.75 * radius, visuals.bg_fill, visuals.fg_stroke);
    }
    response
}

fn draw_count_badge(ui: &egui::Ui, image_rect: egui::Rect, count: usize) {
    let badge = egui::Rect::from_min_size(
        image_rect.left_bottom() + egui::vec2(12.0, -64.0),
        egui::vec2(180.0, 52.0),
    );
    let painter = ui.painter();
    painter.rect_filled(badge, 6.0, Color32::from_rgb(0, 200, 0));
    let text = if count == 1 { "1 finger".to_string() } else { format!("{} fingers", count) };
    painter.text(
        badge.center(),
        Align2::CENTER_CENTER,
        text,
        FontId::proportional(30.0),
        Color32::from_rgb(0, 0, 255),
    );
}
