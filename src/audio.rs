mod event;
mod monitor;
mod spectral;

pub use event::AudioEvent;
pub use monitor::AudioMonitor;
pub use spectral::{AudioStatistics, SpectralConfig, SpectralEventDetector};
