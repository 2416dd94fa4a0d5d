const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Human-readable binary sizes for log output (`1.5 KiB`).
pub trait ByteSizeExt {
    fn human_size(&self) -> String;
}

impl ByteSizeExt for u64 {
    fn human_size(&self) -> String {
        let mut value = *self as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            format!("{} {}", self, UNITS[0])
        } else {
            format!("{:.1} {}", value, UNITS[unit])
        }
    }
}
