use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};

const DBA_COLUMN: &str = "Recorded Value (dBA)";
const STAMP_COLUMN: &str = "Time Stamp (yyyy-MM-dd HH:mm:ss.SSS)";

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Eight-line header block, padded with blank lines.
fn header_block(device: &str, model: &str, start: NaiveDateTime, samples: usize) -> String {
    let lines = [
        format!("Device Name: {device}"),
        format!("Model Number: {model}"),
        format!("Start Time: {}", start.format("%Y-%m-%d %H:%M:%S%.6f")),
        format!("Record Count: {samples}"),
        "Sampling Interval: 100 ms".to_string(),
        "Weighting: A".to_string(),
        "Exported by meter software".to_string(),
        String::new(),
    ];
    lines.join("\n") + "\n"
}

/// `M:SS.s` elapsed-time label, as written by the offset-clock meter.
fn offset_label(elapsed: Duration) -> String {
    let tenths = elapsed.num_milliseconds() / 100;
    let minutes = tenths / 600;
    let seconds = (tenths % 600) as f64 / 10.0;
    format!("{minutes:02}:{seconds:04.1}")
}

fn offset_clock_export(rng: &mut SimpleRng, start: NaiveDateTime, samples: usize, level: f64) -> Result<String> {
    let mut out = header_block("SLM-Target", "8928", start, samples);
    writeln!(out, "{DBA_COLUMN},{STAMP_COLUMN},")?;
    for i in 0..samples {
        let elapsed = Duration::milliseconds(i as i64 * 100);
        writeln!(out, "{:.1},{},", rng.gauss(level, 3.0), offset_label(elapsed))?;
    }
    Ok(out)
}

fn wall_clock_export(rng: &mut SimpleRng, device: &str, start: NaiveDateTime, samples: usize, level: f64) -> Result<String> {
    let mut out = header_block(device, "8922", start, samples);
    writeln!(out, "{STAMP_COLUMN},{DBA_COLUMN},")?;
    for i in 0..samples {
        let ts = start + Duration::milliseconds(i as i64 * 100);
        writeln!(
            out,
            "{},{:.1},",
            ts.format("%Y-%m-%d %H:%M:%S%.3f"),
            rng.gauss(level, 4.0)
        )?;
    }
    Ok(out)
}

fn write(dir: &Path, name: &str, content: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let start = NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_opt(18, 0, 0))
        .context("invalid start time")?;
    let samples = 3000;

    // (file, device name, mean level dBA, minutes after start)
    let wall_clock_sites = [
        ("7pm_food_truck.csv", "SLM-Truck", 68.0, 60),
        ("21st_littlefield_fountain.csv", "SLM-Fountain", 62.0, 15),
        ("22nd_street_construction.csv", "SLM-Construction", 78.0, 30),
        ("SZB_back_area.csv", "SLM-SZB", 55.0, 45),
    ];
    for (file, device, level, delay) in wall_clock_sites {
        let site_start = start + Duration::minutes(delay);
        let content = wall_clock_export(&mut rng, device, site_start, samples, level)?;
        write(&dir, file, &content)?;
    }

    let content = offset_clock_export(&mut rng, start, samples, 64.0)?;
    write(&dir, "target_section.csv", &content)?;

    Ok(())
}
