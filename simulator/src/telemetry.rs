use rand::Rng;
use serde::Serialize;

/// Flat reading in the positional shape: the timestamp must stay the first
/// field, quantities follow in chart order.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherReading {
    pub epoch: u64,
    pub temperature: i64,
    pub humidity: i64,
    pub pressure: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tagged<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleData {
    pub reading: i64,
    pub time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpioReport {
    pub output: String,
    pub state: String,
}

pub fn tagged<T: Serialize>(kind: &'static str, data: T) -> Tagged<T> {
    Tagged { kind, data }
}

pub fn generate_weather(rng: &mut impl Rng, epoch: u64) -> WeatherReading {
    WeatherReading {
        epoch,
        temperature: rng.gen_range(16..40),
        humidity: rng.gen_range(60..95),
        pressure: rng.gen_range(100..760),
    }
}

/// Load-cell force in the units the firmware reports (grams times gravity).
pub fn generate_thrust(rng: &mut impl Rng, time: u64, duration: u64) -> i64 {
    // Rough burn profile: fast rise, plateau, tail off.
    let progress = time as f64 / duration.max(1) as f64;
    let envelope = if progress < 0.1 {
        progress / 0.1
    } else if progress < 0.7 {
        1.0
    } else {
        ((1.0 - progress) / 0.3).max(0.0)
    };
    let noise = rng.gen_range(-500.0..500.0);
    (10_000.0 + 20_000.0 * envelope + noise) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_reading_keeps_epoch_first() {
        let mut rng = rand::thread_rng();
        let json = serde_json::to_string(&generate_weather(&mut rng, 10)).unwrap();
        assert!(json.starts_with(r#"{"epoch":10,"temperature":"#));
    }

    #[test]
    fn test_tagged_envelope() {
        let json = serde_json::to_string(&tagged("sd_status", "OK")).unwrap();
        assert_eq!(json, r#"{"type":"sd_status","data":"OK"}"#);
    }

    #[test]
    fn test_thrust_stays_above_trigger() {
        let mut rng = rand::thread_rng();
        for time in (0..=10_000).step_by(13) {
            assert!(generate_thrust(&mut rng, time, 10_000) >= 9_000);
        }
    }
}
