//! KDL settings file.
//!
//! ```kdl
//! stalta sta=1.0 lta=10.0 method="prefix-sum"
//! ampa window=100.0 step=50.0 noise=90.0 {
//!     filter-length 30.0
//!     filter-length 10.0
//! }
//! takanami order=5 step=1 margin=5.0
//! detection threshold=2.0 peak-window=1.0 refine=true action="clear" processes=4
//! ```
//!
//! Every node and property is optional; anything left out keeps the built-in
//! default.

use anyhow::Context;
use knuffel::Decode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::{Action, DetectionConfig};
use crate::error::{PickError, Result as PickResult};
use crate::picking::{Algorithm, Ampa, ArRefiner, StaLta, StaLtaMethod};

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[knuffel(child)]
    pub stalta: Option<StaLtaSettings>,
    #[knuffel(child)]
    pub ampa: Option<AmpaSettings>,
    #[knuffel(child)]
    pub takanami: Option<TakanamiSettings>,
    #[knuffel(child)]
    pub detection: Option<DetectionSettings>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaLtaSettings {
    #[knuffel(property)]
    pub sta: Option<f64>,
    #[knuffel(property)]
    pub lta: Option<f64>,
    #[knuffel(property)]
    pub method: Option<String>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmpaSettings {
    #[knuffel(property)]
    pub window: Option<f64>,
    #[knuffel(property)]
    pub step: Option<f64>,
    #[knuffel(property(name = "l-coef"))]
    pub l_coef: Option<f64>,
    #[knuffel(property)]
    pub noise: Option<f64>,
    #[knuffel(property)]
    pub bandwidth: Option<f64>,
    #[knuffel(property)]
    pub overlap: Option<f64>,
    #[knuffel(property(name = "f-start"))]
    pub f_start: Option<f64>,
    #[knuffel(property(name = "f-end"))]
    pub f_end: Option<f64>,
    #[knuffel(property)]
    pub u: Option<f64>,
    #[knuffel(children(name = "filter-length"))]
    pub filter_lengths: Vec<FilterLength>,
}

#[derive(Decode, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLength {
    #[knuffel(argument)]
    pub seconds: f64,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakanamiSettings {
    #[knuffel(property)]
    pub order: Option<u32>,
    #[knuffel(property)]
    pub step: Option<u32>,
    #[knuffel(property)]
    pub margin: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    #[knuffel(property)]
    pub threshold: Option<f64>,
    #[knuffel(property(name = "peak-window"))]
    pub peak_window: Option<f64>,
    #[knuffel(property)]
    pub refine: Option<bool>,
    #[knuffel(property)]
    pub action: Option<String>,
    #[knuffel(property)]
    pub multiprocessing: Option<bool>,
    #[knuffel(property)]
    pub processes: Option<u32>,
    #[knuffel(property)]
    pub worker: Option<String>,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let settings = knuffel::parse("seispick.kdl", text)?;
        Ok(settings)
    }

    pub fn stalta(&self) -> PickResult<StaLta> {
        let mut detector = StaLta::default();
        if let Some(s) = &self.stalta {
            if let Some(sta) = s.sta {
                detector.sta_length = sta;
            }
            if let Some(lta) = s.lta {
                detector.lta_length = lta;
            }
            if let Some(method) = &s.method {
                detector.method = method.parse::<StaLtaMethod>()?;
            }
        }
        detector.validate()?;
        Ok(detector)
    }

    /// AMPA parameters. Values are checked against the signal when the
    /// detector runs.
    pub fn ampa(&self) -> Ampa {
        let mut params = Ampa::default();
        let Some(s) = &self.ampa else {
            return params;
        };
        let overrides = [
            (&mut params.window, s.window),
            (&mut params.step, s.step),
            (&mut params.l_coef, s.l_coef),
            (&mut params.noise_thr, s.noise),
            (&mut params.bandwidth, s.bandwidth),
            (&mut params.overlap, s.overlap),
            (&mut params.f_start, s.f_start),
            (&mut params.f_end, s.f_end),
            (&mut params.u, s.u),
        ];
        for (field, value) in overrides {
            if let Some(v) = value {
                *field = v;
            }
        }
        if !s.filter_lengths.is_empty() {
            params.filter_lengths = s.filter_lengths.iter().map(|l| l.seconds).collect();
        }
        params
    }

    pub fn refiner(&self) -> PickResult<ArRefiner> {
        let mut refiner = ArRefiner::default();
        if let Some(t) = &self.takanami {
            if let Some(k) = t.order {
                refiner.k = k as usize;
            }
            if let Some(p) = t.step {
                refiner.p = p as usize;
            }
        }
        refiner.validate()?;
        Ok(refiner)
    }

    pub fn detection_config(&self) -> PickResult<DetectionConfig> {
        let mut config = DetectionConfig { refiner: self.refiner()?, ..DetectionConfig::default() };
        if let Some(margin) = self.takanami.as_ref().and_then(|t| t.margin) {
            config.takanami_margin = margin;
        }
        if let Some(d) = &self.detection {
            config.threshold = d.threshold.or(config.threshold);
            config.peak_window = d.peak_window.unwrap_or(config.peak_window);
            config.takanami = d.refine.unwrap_or(config.takanami);
            config.allow_multiprocessing = d.multiprocessing.unwrap_or(config.allow_multiprocessing);
            if let Some(action) = &d.action {
                config.action = action.parse::<Action>()?;
            }
            if let Some(processes) = d.processes {
                config.processes = processes as usize;
            }
            if let Some(worker) = &d.worker {
                config.worker_program = Some(PathBuf::from(worker));
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Detector named `stalta` or `ampa`, configured from this file.
    pub fn detector(&self, name: &str) -> PickResult<Algorithm> {
        match name {
            "stalta" => Ok(self.stalta()?.into()),
            "ampa" => Ok(self.ampa().into()),
            other => Err(PickError::config(format!(
                "unknown detector '{}', expected 'stalta' or 'ampa'",
                other
            ))),
        }
    }
}
