use image::RgbImage;
use restorico_core::{Config, FaceRestore, HostError, Pipeline, PipelineError, Upscale};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Host(#[from] HostError),
    #[error("restoration failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the UI to the engine thread.
enum EngineRequest {
    Restore {
        image: RgbImage,
        reply: oneshot::Sender<Result<RgbImage, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Restore faces in `image` and upscale it.
    pub async fn restore(&self, image: RgbImage) -> Result<RgbImage, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Restore {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load all models and start the engine thread.
///
/// Fails fast if any weight file is missing or any model fails to load.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let pipeline = restorico_core::load_pipeline(config)?;
    tracing::info!(model_dir = %config.model_dir.display(), "models loaded");
    spawn_with(pipeline)
}

/// Serve requests with `pipeline` on a dedicated OS thread, one at a time.
pub fn spawn_with<R, U>(mut pipeline: Pipeline<R, U>) -> Result<EngineHandle, EngineError>
where
    R: FaceRestore + Send + 'static,
    U: Upscale + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("restorico-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Restore { image, reply } => {
                        let result = pipeline.run(&image).map_err(EngineError::from);
                        if let Err(err) = &result {
                            tracing::warn!(error = %err, "restore request failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
