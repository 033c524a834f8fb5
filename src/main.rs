use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dann_voice::voice::{AudioFrameSource, AudioPlayback, PiperSynthesizer, Synthesizer, rms};
use dann_voice::{Config, Daemon};

/// Dann - local voice assistant
#[derive(Parser)]
#[command(name = "dann", version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "DANN_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Load, validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,dann_voice=info",
        1 => "info,dann_voice=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::CheckConfig => {
                check_config(&config);
                Ok(())
            }
        };
    }

    tracing::info!(config = ?cli.config, "starting dann");

    // Run until interrupted
    Daemon::new(config).run().await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (mut source, mut frames) = AudioFrameSource::open(&config.audio)?;
    println!("Device: {}", source.device_name());
    println!("Sample rate: {} Hz", source.sample_rate());
    println!("Silence threshold: {:.4}", config.audio.silence_threshold);
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            samples.extend_from_slice(frame.samples());
        }

        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if energy < config.audio.silence_threshold { "silent" } else { "voice" };

        let second = i + 1;
        println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}] {marker}");
    }

    source.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Set audio.input_device in the config file");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(config.audio.output_device.clone())?;

    // Generate 2 seconds of 440Hz sine wave at 22.05kHz, Piper's usual rate
    let sample_rate = 22_050_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    tokio::task::spawn_blocking(move || playback.play_samples_blocking(samples, sample_rate))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Set audio.output_device in the config file");

    Ok(())
}

/// Test TTS output via Piper
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = PiperSynthesizer::new(&config.tts)?;
    println!("Voice: {}", synthesizer.voice().display());

    let out = tempfile::Builder::new()
        .prefix("dann-tts-")
        .suffix(".wav")
        .tempfile()?;

    println!("Synthesizing speech...");
    synthesizer.synthesize(text, out.path()).await?;
    println!("Wrote {} bytes of audio", std::fs::metadata(out.path())?.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new(config.audio.output_device.clone())?;
    let path = out.path().to_path_buf();
    tokio::task::spawn_blocking(move || playback.play_file_blocking(&path)).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print the effective configuration
fn check_config(config: &Config) {
    let audio = &config.audio;
    let wake = &config.wake_word;

    println!("Configuration OK\n");
    println!("[audio]");
    println!("  sample_rate        {} Hz", audio.sample_rate);
    println!("  channels           {}", audio.channels);
    println!("  block              {} ms ({} samples)", audio.block_ms, audio.block_samples());
    println!("  silence_timeout    {} ms", audio.silence_timeout_ms);
    println!("  max_record         {} ms", audio.max_record_ms);
    println!("  silence_threshold  {}", audio.silence_threshold);
    println!("  input_device       {}", audio.input_device.as_deref().unwrap_or("(default)"));
    println!("  output_device      {}", audio.output_device.as_deref().unwrap_or("(default)"));
    println!("[wake_word]");
    println!("  engine             {:?}", wake.engine);
    println!(
        "  model_path         {}",
        wake.model_path.as_ref().map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
    );
    println!("  sensitivity        {}", wake.sensitivity);
    println!("  debounce           {} frames", wake.debounce);
    println!("  cooldown           {} ms", wake.cooldown.as_millis());
    println!("[stt]");
    println!("  provider           {:?}", config.stt.provider);
    println!("  command            {}", config.stt.command);
    println!("  model              {}", config.stt.model);
    println!("  language           {}", config.stt.language);
    println!("  url                {}", config.stt.url.as_deref().unwrap_or("(none)"));
    let api_key = if config.stt.api_key.is_some() {
        "(set)"
    } else {
        "(none)"
    };
    println!("  api_key            {api_key}");
    println!("  timeout            {} s", config.stt.timeout.as_secs());
    println!("[llm]");
    println!("  base_url           {}", config.llm.base_url);
    println!("  model              {}", config.llm.model);
    println!("  temperature        {}", config.llm.temperature);
    println!("  max_tokens         {}", config.llm.max_tokens);
    println!("  timeout            {} s", config.llm.timeout.as_secs());
    println!("[tts]");
    println!("  piper_path         {}", config.tts.piper_path);
    println!("  voice_model        {}", config.tts.voice_model.display());
    println!("  speed              {}", config.tts.speed);
    println!("  timeout            {} s", config.tts.timeout.as_secs());
}
