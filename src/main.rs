#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod error;
mod model_download;
mod pipeline;
mod types;
mod ui;

use anyhow::Result;
use gpui::Application;

use config::AppConfig;

fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::from_env()?;
    if config.list_cameras {
        return list_cameras();
    }
    log::info!("starting with {config:?}");

    let session = pipeline::build_session(&config);

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            // Closing the window drops the session, which releases the camera.
            app.on_window_closed(|app| {
                if app.windows().is_empty() {
                    app.quit();
                }
            })
            .detach();

            if let Err(err) = ui::launch_ui(app, session) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    for device in pipeline::available_cameras()? {
        println!("{}: {}", device.index, device.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    anyhow::bail!("built without the camera-nokhwa feature")
}
