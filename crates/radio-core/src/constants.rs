/// Engine timing and level constants.
///
/// Gains are linear, times are seconds unless the name says otherwise.
/// Exponential ramps cannot reach zero, so "silent" always means `GAIN_FLOOR`.
pub const GAIN_FLOOR: f32 = 0.0001;

// Mixing topology
pub const MASTER_GAIN: f32 = 0.9;
pub const STATION_LEVEL: f32 = 0.95;
pub const TEXTURE_AMOUNT_MAX: f32 = 0.35;
pub const TRANSITION_LEVEL: f32 = 0.32;

// Station switch
pub const STATION_FADE_OUT_SEC: f64 = 0.03;
pub const STATION_FADE_IN_SEC: f64 = 0.25;

// Tuning (scan) sequence
pub const SCAN_DUCK_SEC: f64 = 0.06;
pub const SCAN_SWELL_SEC: f64 = 0.04;
pub const SCAN_LOCK_DELAY_MS: u32 = 550;
pub const SCAN_DECAY_SEC: f64 = 0.38;

// Texture
pub const TEXTURE_RAMP_SEC: f64 = 0.12;

// Limiter (DynamicsCompressor) settings
pub const LIMITER_THRESHOLD_DB: f32 = -18.0;
pub const LIMITER_KNEE_DB: f32 = 24.0;
pub const LIMITER_RATIO: f32 = 12.0;
pub const LIMITER_ATTACK_SEC: f32 = 0.003;
pub const LIMITER_RELEASE_SEC: f32 = 0.25;

// Analyser
pub const ANALYSER_FFT_SIZE: u32 = 2048;
pub const ANALYSER_SMOOTHING: f64 = 0.7;

// Noise buffers
pub const NOISE_BUFFER_SECONDS: f64 = 8.0;
pub const NOISE_CHANNELS: usize = 2;
pub const NOISE_SEED_LEFT: u32 = 0x1234_5678;
pub const NOISE_SEED_RIGHT: u32 = 0x9e37_79b9;
pub const BROWN_LEAK: f32 = 0.02;
pub const BROWN_SCALE: f32 = 3.5; // empirical loudness calibration
pub const PINK_SCALE: f32 = 0.11; // empirical loudness calibration

// Scheduler
pub const SCHEDULER_MIN_TICK_MS: u32 = 25;
