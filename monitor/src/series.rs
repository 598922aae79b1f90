use crate::model::Point;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_CAP: usize = 40;

/// A bounded window of points for one tracked quantity.
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub name: String,
    pub points: VecDeque<Point>,
    #[serde(skip)]
    cap: usize,
}

impl Series {
    pub fn new(name: impl Into<String>, cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            name: name.into(),
            points: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Appends a point, evicting the oldest one once the window is full.
    pub fn push(&mut self, point: Point) -> Option<Point> {
        let evicted = if self.points.len() >= self.cap {
            self.points.pop_front()
        } else {
            None
        };
        self.points.push_back(point);
        evicted
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.back()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Chart {
    pub series: Vec<Series>,
    #[serde(skip)]
    cap: usize,
}

impl Chart {
    pub fn new<I, S>(names: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            series: names.into_iter().map(|n| Series::new(n, cap)).collect(),
            cap,
        }
    }

    /// Appends to the series at `index`. Indices past the configured
    /// series grow the chart with series named `name`.
    pub fn push_at(&mut self, index: usize, name: &str, point: Point) {
        while self.series.len() <= index {
            let label = if self.series.len() == index {
                name.to_string()
            } else {
                format!("series-{}", self.series.len())
            };
            debug!("Adding series {} at position {}", label, self.series.len());
            self.series.push(Series::new(label, self.cap));
        }
        self.series[index].push(point);
    }

    /// Appends to the series called `name`, creating it if needed.
    pub fn push_named(&mut self, name: &str, point: Point) {
        match self.series.iter_mut().find(|s| s.name == name) {
            Some(series) => {
                series.push(point);
            }
            None => {
                debug!("Adding series {}", name);
                let mut series = Series::new(name, self.cap);
                series.push(point);
                self.series.push(series);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: i64, value: f64) -> Point {
        Point { timestamp, value }
    }

    #[test]
    fn test_series_grows_until_cap() {
        let mut series = Series::new("temperature", 3);
        assert!(series.push(point(1, 1.0)).is_none());
        assert!(series.push(point(2, 2.0)).is_none());
        assert!(series.push(point(3, 3.0)).is_none());
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_series_evicts_oldest_at_cap() {
        let mut series = Series::new("temperature", DEFAULT_CAP);
        for i in 0..DEFAULT_CAP as i64 {
            series.push(point(i, i as f64));
        }

        for i in 0..10 {
            let t = DEFAULT_CAP as i64 + i;
            let evicted = series.push(point(t, t as f64)).unwrap();
            assert_eq!(evicted.timestamp, i);
            assert_eq!(series.len(), DEFAULT_CAP);
            assert_eq!(series.last().unwrap().timestamp, t);
        }

        assert_eq!(series.points.front().unwrap().timestamp, 10);
    }

    #[test]
    fn test_zero_cap_keeps_latest_point() {
        let mut series = Series::new("x", 0);
        series.push(point(1, 1.0));
        series.push(point(2, 2.0));
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().timestamp, 2);
    }

    #[test]
    fn test_chart_grows_for_unknown_position() {
        let mut chart = Chart::new(["temperature"], 5);
        chart.push_at(2, "pressure", point(1, 700.0));

        assert_eq!(chart.series.len(), 3);
        assert_eq!(chart.series[1].name, "series-1");
        assert!(chart.series[1].is_empty());
        assert_eq!(chart.series[2].name, "pressure");
        assert_eq!(chart.series[2].len(), 1);
    }

    #[test]
    fn test_push_named_creates_series_once() {
        let mut chart = Chart::new(Vec::<String>::new(), 5);
        chart.push_named("thrust", point(0, 10.0));
        chart.push_named("thrust", point(13, 11.0));

        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.get("thrust").unwrap().len(), 2);
        assert_eq!(chart.get("thrust").unwrap().cap(), 5);
    }
}
