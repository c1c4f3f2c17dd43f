pub mod playlist;
pub mod settings;

pub use playlist::PlaylistRepository;
pub use settings::SettingsRepository;
