#[cfg(not(feature = "sim"))]
fn main() {
    eprintln!(
        "The stacksynth demo requires the \"sim\" feature. Rebuild with `--features sim` (enabled by default) to run the simulated chain."
    );
}

#[cfg(feature = "sim")]
mod cli {
    use std::env;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    use anyhow::{bail, Context};
    use stacksynth::sim::Chain;
    use stacksynth::{Control, UnitConfig, Voice};

    /// How long each riff note is held.
    const NOTE_HOLD: Duration = Duration::from_millis(160);

    /// Slack for a broadcast to cross the simulated bus and be scanned in.
    const SETTLE: Duration = Duration::from_millis(50);

    /// A short arpeggio, as note indices within one octave.
    const RIFF: [u8; 7] = [0, 4, 7, 9, 7, 4, 0];

    #[cfg(feature = "streaming")]
    mod audio {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;

        use parking_lot::Mutex;
        use stacksynth::streaming::{pump_engine, RingBuffer, StreamConfig};
        use stacksynth::{AudioDevice, AudioEngine};

        /// A live output stream: rodio sink plus the producer thread
        /// feeding its ring buffer.
        pub struct Output {
            device: AudioDevice,
            running: Arc<AtomicBool>,
            pump: thread::JoinHandle<()>,
        }

        /// Starts streaming the engine to the default audio device.
        /// Returns `None` (and keeps the demo silent) when no backend is
        /// available, as on a headless CI box.
        pub fn start(engine: AudioEngine) -> Option<Output> {
            let config = StreamConfig::low_latency();
            let ring = match RingBuffer::new(config.ring_buffer_size) {
                Ok(ring) => Arc::new(Mutex::new(ring)),
                Err(e) => {
                    eprintln!("Ring buffer setup failed ({}), running silent.", e);
                    return None;
                }
            };
            let device = match AudioDevice::new(&config, Arc::clone(&ring)) {
                Ok(device) => device,
                Err(e) => {
                    eprintln!("Audio device unavailable ({}), running silent.", e);
                    return None;
                }
            };
            let running = Arc::new(AtomicBool::new(true));
            let pump = {
                let running = Arc::clone(&running);
                thread::spawn(move || pump_engine(&engine, &ring, &running))
            };
            println!(
                "Audio device initialized - streaming at {} Hz ({:.1} ms buffer)\n",
                config.sample_rate,
                config.latency_ms()
            );
            Some(Output {
                device,
                running,
                pump,
            })
        }

        impl Output {
            /// Stops the producer and lets the sink drain.
            pub fn stop(self) {
                self.running.store(false, Ordering::Release);
                let _ = self.pump.join();
                self.device.finish();
            }
        }
    }

    pub fn run() -> anyhow::Result<()> {
        println!("Stackable Keyboard Synth - Simulated Chain Demo");
        println!("===============================================\n");

        let mut units = 3usize;
        let mut config_path: Option<PathBuf> = None;
        let mut show_help = false;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    show_help = true;
                }
                "--units" => {
                    if let Some(value) = args.next() {
                        match value.parse::<usize>() {
                            Ok(count) if count >= 1 => units = count,
                            _ => {
                                eprintln!("Invalid unit count: {}", value);
                                show_help = true;
                            }
                        }
                    } else {
                        eprintln!("--units requires a count");
                        show_help = true;
                    }
                }
                _ if arg.starts_with("--units=") => {
                    let value = &arg[8..];
                    match value.parse::<usize>() {
                        Ok(count) if count >= 1 => units = count,
                        _ => {
                            eprintln!("Invalid unit count: {}", value);
                            show_help = true;
                        }
                    }
                }
                "--config" => {
                    if let Some(value) = args.next() {
                        config_path = Some(PathBuf::from(value));
                    } else {
                        eprintln!("--config requires a file path");
                        show_help = true;
                    }
                }
                _ if arg.starts_with("--config=") => {
                    config_path = Some(PathBuf::from(&arg[9..]));
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    show_help = true;
                }
            }
        }

        if show_help {
            eprintln!(
                "Usage:\n  stacksynth [--units <count>] [--config <file.json>]\n\nFlags:\n  --units <count>      Number of units in the simulated chain (default 3)\n  --config <file>      Load a timing profile and run mode from JSON\n  -h, --help           Show this help\n"
            );
            return Ok(());
        }

        let config = match config_path {
            Some(path) => {
                println!("Loading config: {}\n", path.display());
                UnitConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?
            }
            None => UnitConfig::simulation(),
        };

        println!("Booting a chain of {} unit(s)...", units);
        let chain = Chain::start(units, &config);
        if !chain.wait_converged(Duration::from_secs(5)) {
            chain.shutdown();
            bail!("chain failed to converge");
        }

        println!("Chain converged:\n");
        for index in 0..chain.len() {
            let state = chain.unit(index).state();
            println!(
                "  unit {}: octave {}  range {}..={}  {:?}",
                index,
                state.octave(),
                state.lowest_octave(),
                state.highest_octave(),
                state.role()
            );
        }
        println!();

        let receiver = chain
            .receiver_index()
            .context("no Receiver in the chain")?;
        println!("Unit {} holds the Receiver role and sounds every note.\n", receiver);

        // Twist the receiver's knobs; the scan loop broadcasts both
        // settings and every relay adopts them.
        chain.unit(receiver).controls.turn(Control::Volume, 6);
        chain.unit(receiver).controls.turn(Control::Waveform, 2);
        thread::sleep(SETTLE);
        let west = chain.unit(0).state();
        println!(
            "Settings synced across the chain: volume {} / {}\n",
            west.volume(),
            west.waveform().name()
        );

        #[cfg(feature = "streaming")]
        let output = audio::start(chain.unit(receiver).engine().clone());

        // Riff on the westmost unit. Its key events relay over the bus
        // and sound on the receiver at the west unit's octave.
        let riff_octave = chain.unit(0).state().octave();
        println!("Riff from unit 0 (octave {}):", riff_octave);
        for note in RIFF {
            chain.unit(0).keys.press(note);
            thread::sleep(NOTE_HOLD);
            let sounding: Vec<String> = chain
                .unit(receiver)
                .voices()
                .snapshot()
                .iter()
                .flatten()
                .map(Voice::label)
                .collect();
            println!(
                "  {} held -> receiver voices [{}]",
                Voice::new(note, riff_octave).label(),
                sounding.join(" ")
            );
            chain.unit(0).keys.release(note);
            thread::sleep(NOTE_HOLD);
        }
        println!();

        // A chord across the whole register: one key per unit, so the
        // receiver stacks the same note name over several octaves.
        println!("Chord, one key per unit:");
        for index in 0..chain.len() {
            chain.unit(index).keys.press(9);
        }
        thread::sleep(SETTLE);
        let sounding: Vec<String> = chain
            .unit(receiver)
            .voices()
            .snapshot()
            .iter()
            .flatten()
            .map(Voice::label)
            .collect();
        println!("  receiver voices [{}]", sounding.join(" "));

        // Bend the chord with the receiver's joystick, then recentre.
        println!("  bending up...");
        chain.unit(receiver).controls.set_joystick(760);
        thread::sleep(Duration::from_millis(300));
        chain.unit(receiver).controls.set_joystick(512);
        thread::sleep(Duration::from_millis(200));

        let mut buf = [0u8; 1024];
        chain.unit(receiver).engine().fill(&mut buf);
        let peak = buf
            .iter()
            .map(|&sample| (sample as i16 - 128).unsigned_abs())
            .max()
            .unwrap_or(0);
        println!("  peak output deviation: {} / 127\n", peak);

        for index in 0..chain.len() {
            chain.unit(index).keys.release(9);
        }
        thread::sleep(SETTLE);

        #[cfg(feature = "streaming")]
        if let Some(output) = output {
            output.stop();
        }

        chain.shutdown();
        println!("Demo complete.");
        Ok(())
    }
}

#[cfg(feature = "sim")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
