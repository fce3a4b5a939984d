use tracing_subscriber::EnvFilter;

mod app;
mod engine;
mod files;

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("restorico-ui starting");

    iced::application("Ultra HQ Old Photo Restorer", app::Restorico::update, app::Restorico::view)
        .theme(app::Restorico::theme)
        .centered()
        .run_with(app::Restorico::new)
}
