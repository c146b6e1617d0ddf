// src/main.rs
#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod camera;
mod config;
mod detector;
mod devices;
mod landmarks;
mod license;
mod tracking;
mod ui;

fn main() -> eframe::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting finger_home");

    let config = config::AppConfig::load();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 700.0])
            .with_min_inner_size([640.0, 420.0])
            .with_title("AI Smart Home Control"),
        ..Default::default()
    };

    eframe::run_native(
        "finger_home",
        native_options,
        Box::new(|cc| Ok(Box::new(ui::SmartHomeUI::new(cc, config)))),
    )
}
