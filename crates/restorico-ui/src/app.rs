use crate::engine::{self, EngineHandle};
use crate::files;
use anyhow::Context;
use iced::widget::image::Handle;
use iced::widget::{button, column, container, row, text, Image};
use iced::{Alignment, Element, Length, Task, Theme};
use image::RgbImage;
use restorico_core::Config;
use restorico_models::{Action, HttpFetcher, Manifest};
use rfd::FileDialog;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine lifecycle as seen by the UI.
#[derive(Debug)]
enum EngineState {
    Starting,
    Ready(EngineHandle),
    Failed,
}

/// An image together with its display handle.
#[derive(Debug, Clone)]
struct Shown {
    image: Arc<RgbImage>,
    handle: Handle,
}

impl Shown {
    fn new(image: Arc<RgbImage>) -> Self {
        let handle = Handle::from_rgba(image.width(), image.height(), files::to_rgba(&image));
        Self { image, handle }
    }
}

pub struct Restorico {
    engine: EngineState,
    original: Option<Shown>,
    restored: Option<Shown>,
    busy: bool,
    status: String,
}

#[derive(Debug, Clone)]
pub enum Message {
    EngineReady(Result<EngineHandle, String>),
    Upload,
    Loaded(Result<Arc<RgbImage>, String>),
    Restore,
    Restored(Result<Arc<RgbImage>, String>),
    Download,
    Saved(Result<PathBuf, String>),
}

impl Restorico {
    pub fn new() -> (Self, Task<Message>) {
        let config = Config::from_env();
        (
            Self::starting(),
            Task::perform(start_engine(config), Message::EngineReady),
        )
    }

    fn starting() -> Self {
        Self {
            engine: EngineState::Starting,
            original: None,
            restored: None,
            busy: false,
            status: "Downloading models (first run only)...".to_string(),
        }
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::EngineReady(Ok(handle)) => {
                self.engine = EngineState::Ready(handle);
                self.status = "Ready. Upload a photo to restore.".to_string();
                Task::none()
            }
            Message::EngineReady(Err(err)) => {
                tracing::error!(error = %err, "engine startup failed");
                self.status = format!("Startup failed: {err}");
                self.engine = EngineState::Failed;
                Task::none()
            }
            Message::Upload => {
                let picked = FileDialog::new()
                    .set_title("Upload an old photo")
                    .add_filter("Images", files::UPLOAD_EXTENSIONS)
                    .pick_file();

                match picked {
                    Some(path) if files::is_upload(&path) => {
                        self.status = format!("Loading {}...", path.display());
                        Task::perform(files::load_image(path), |result| {
                            Message::Loaded(result.map(Arc::new).map_err(|e| format!("{e:#}")))
                        })
                    }
                    Some(path) => {
                        self.status = format!("Unsupported file: {}", path.display());
                        Task::none()
                    }
                    None => Task::none(),
                }
            }
            Message::Loaded(Ok(image)) => {
                self.status = format!("Loaded {}x{} photo.", image.width(), image.height());
                self.original = Some(Shown::new(image));
                self.restored = None;
                Task::none()
            }
            Message::Loaded(Err(err)) | Message::Saved(Err(err)) => {
                self.status = format!("Error: {err}");
                Task::none()
            }
            Message::Restore => {
                let (EngineState::Ready(engine), Some(original)) = (&self.engine, &self.original)
                else {
                    return Task::none();
                };
                if self.busy {
                    return Task::none();
                }
                self.busy = true;
                self.status = "Restoring photo, please wait...".to_string();

                let engine = engine.clone();
                let image = RgbImage::clone(&original.image);
                Task::perform(async move { engine.restore(image).await }, |result| {
                    Message::Restored(result.map(Arc::new).map_err(|e| e.to_string()))
                })
            }
            Message::Restored(Err(err)) => {
                self.busy = false;
                self.status = format!("Error: {err}");
                Task::none()
            }
            Message::Restored(Ok(image)) => {
                self.busy = false;
                self.status = format!("Done. Restored photo is {}x{}.", image.width(), image.height());
                self.restored = Some(Shown::new(image));
                Task::none()
            }
            Message::Download => {
                let Some(restored) = &self.restored else {
                    return Task::none();
                };
                let target = FileDialog::new()
                    .set_title("Save restored photo")
                    .set_file_name(files::DEFAULT_OUTPUT_NAME)
                    .add_filter("PNG", &["png"])
                    .save_file();

                match target {
                    Some(path) => Task::perform(files::save_png(path, restored.image.clone()), |result| {
                        Message::Saved(result.map_err(|e| format!("{e:#}")))
                    }),
                    None => Task::none(),
                }
            }
            Message::Saved(Ok(path)) => {
                self.status = format!("Saved {}", path.display());
                Task::none()
            }
        }
    }

    pub fn view(&self) -> Element<'_, Message> {
        let can_restore =
            matches!(self.engine, EngineState::Ready(_)) && self.original.is_some() && !self.busy;

        let controls = row![
            button("Upload").on_press(Message::Upload).padding(10),
            button("Restore Photo")
                .on_press_maybe(can_restore.then_some(Message::Restore))
                .padding(10),
            button("Download Restored Photo")
                .on_press_maybe(self.restored.is_some().then_some(Message::Download))
                .padding(10),
        ]
        .spacing(12);

        let images = row![
            panel("Original", self.original.as_ref()),
            panel("Restored", self.restored.as_ref()),
        ]
        .spacing(20)
        .height(Length::Fill);

        let content = column![
            text("Ultra HQ Old Photo Restorer").size(32),
            text("Restores faces with GFPGAN and upscales 4x with Real-ESRGAN.").size(14),
            controls,
            images,
            text(&self.status).size(16),
        ]
        .spacing(16)
        .padding(24)
        .align_x(Alignment::Center);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    pub fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn panel<'a>(title: &'a str, shown: Option<&'a Shown>) -> Element<'a, Message> {
    let body: Element<'a, Message> = match shown {
        Some(shown) => Image::new(shown.handle.clone())
            .width(Length::Fill)
            .height(Length::Fill)
            .into(),
        None => container(text("No image"))
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into(),
    };

    column![text(title).size(18), body]
        .spacing(8)
        .width(Length::FillPortion(1))
        .align_x(Alignment::Center)
        .into()
}

/// Provision weights, then load the models onto the engine thread.
async fn start_engine(config: Config) -> Result<EngineHandle, String> {
    provision_and_spawn(config).await.map_err(|e| format!("{e:#}"))
}

async fn provision_and_spawn(config: Config) -> anyhow::Result<EngineHandle> {
    let manifest =
        Manifest::load(config.manifest_path.as_deref()).context("failed to load weight manifest")?;
    let fetcher = HttpFetcher::new().context("failed to build HTTP client")?;

    let report = restorico_models::ensure_weights(&config.model_dir, &manifest.models, &fetcher)
        .await
        .context("weight provisioning failed")?;
    let downloaded = report
        .iter()
        .filter(|p| matches!(p.action, Action::Downloaded { .. }))
        .count();
    tracing::info!(downloaded, total = report.len(), "weights provisioned");

    let handle = tokio::task::spawn_blocking(move || engine::spawn_engine(&config))
        .await
        .context("engine startup task panicked")??;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(w: u32, h: u32) -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(w, h, image::Rgb([10, 20, 30])))
    }

    #[test]
    fn test_startup_failure_keeps_restore_disabled() {
        let mut app = Restorico::starting();
        let _ = app.update(Message::EngineReady(Err("missing weights".into())));
        let _ = app.update(Message::Loaded(Ok(photo(4, 4))));

        assert!(matches!(app.engine, EngineState::Failed));
        let _ = app.update(Message::Restore);
        assert!(!app.busy);
        assert!(app.restored.is_none());
    }

    #[test]
    fn test_failure_message_is_shown() {
        let mut app = Restorico::starting();
        let _ = app.update(Message::EngineReady(Err("missing weights".into())));
        assert!(app.status.contains("missing weights"));
    }

    #[test]
    fn test_new_upload_clears_previous_result() {
        let mut app = Restorico::starting();
        let _ = app.update(Message::Loaded(Ok(photo(2, 2))));
        let _ = app.update(Message::Restored(Ok(photo(8, 8))));
        assert!(app.restored.is_some());

        let _ = app.update(Message::Loaded(Ok(photo(3, 3))));
        assert!(app.restored.is_none());
        assert_eq!(app.original.as_ref().map(|s| s.image.width()), Some(3));
    }

    #[test]
    fn test_restore_error_ends_interaction() {
        let mut app = Restorico::starting();
        app.busy = true;
        let _ = app.update(Message::Restored(Err("inference failed".into())));
        assert!(!app.busy);
        assert!(app.status.starts_with("Error:"));
    }

    #[test]
    fn test_download_without_result_is_noop() {
        let mut app = Restorico::starting();
        let status = app.status.clone();
        let _ = app.update(Message::Download);
        assert_eq!(app.status, status);
    }
}
