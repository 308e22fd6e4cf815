//! ProjectSettings - プロジェクトの JSON ファイル
//!
//! フィールドの順序は保存時にそのまま出力されます（2 スペースのインデント）。
//! 選択肢のある値は enum にしているので、未知の値は読み込み時にエラーになります。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ProjectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    #[default]
    Idpp,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NebMethod {
    #[default]
    Aseneb,
    Improvedtangent,
    Eb,
    Spline,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NebOptimizer {
    #[default]
    Fire,
    Lbfgs,
    Lbfgslinesearch,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculatorType {
    #[default]
    Xtb,
    G16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XtbGfn {
    Gfn0,
    Gfn1,
    #[default]
    Gfn2,
    Gfnff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solvation {
    Alpb,
    Gbsa,
}

/// Calculation settings stored in `<project>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub num_images: u32,
    pub opt_init: bool,
    pub opt_final: bool,
    pub interpolation_method: InterpolationMethod,
    pub neb_k: f64,
    pub neb_climb: bool,
    pub neb_method: NebMethod,
    pub neb_optimizer: NebOptimizer,
    pub neb_fmax: f64,
    pub neb_steps: u32,
    pub neb_parallel: u32,
    pub calculator_type: CalculatorType,
    pub xtb_gfn: XtbGfn,
    pub xtb_solvation: Option<Solvation>,
    pub xtb_solvent: Option<String>,
    pub xtb_uhf: u32,
    pub xtb_charge: i32,
    pub xtb_cpu: u32,
    pub xtb_memory_per_cpu: String,
    pub g16_cpu: u32,
    pub g16_memory: String,
    pub g16_guess_additional_keywords: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            num_images: 10,
            opt_init: true,
            opt_final: true,
            interpolation_method: InterpolationMethod::default(),
            neb_k: 0.1,
            neb_climb: true,
            neb_method: NebMethod::default(),
            neb_optimizer: NebOptimizer::default(),
            neb_fmax: 0.05,
            neb_steps: 1000,
            neb_parallel: 1,
            calculator_type: CalculatorType::default(),
            xtb_gfn: XtbGfn::default(),
            xtb_solvation: None,
            xtb_solvent: None,
            xtb_uhf: 0,
            xtb_charge: 0,
            xtb_cpu: 2,
            xtb_memory_per_cpu: "500M".to_string(),
            g16_cpu: 1,
            g16_memory: "1GB".to_string(),
            g16_guess_additional_keywords: "stable=opt guess=mix".to_string(),
        }
    }
}

impl ProjectSettings {
    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let text = fs::read_to_string(path).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&text).map_err(|source| ProjectError::Settings {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProjectError> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self).map_err(|source| ProjectError::Settings {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.num_images == 0 {
            return Err(ProjectError::Invalid("num_images must be at least 1".to_string()));
        }
        if self.neb_parallel == 0 {
            return Err(ProjectError::Invalid("neb_parallel must be at least 1".to_string()));
        }
        if self.xtb_solvation.is_some() && self.xtb_solvent.as_deref().is_none_or(str::is_empty) {
            return Err(ProjectError::Invalid(
                "xtb_solvation requires xtb_solvent".to_string(),
            ));
        }
        Ok(())
    }

    /// Images including both end points.
    pub fn num_nodes(&self) -> u32 {
        self.num_images + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn save_then_load_keeps_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let settings = ProjectSettings {
            num_images: 8,
            calculator_type: CalculatorType::G16,
            xtb_solvation: Some(Solvation::Alpb),
            xtb_solvent: Some("Water".to_string()),
            ..ProjectSettings::default()
        };

        settings.save(&path).unwrap();

        assert_eq!(ProjectSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn saved_file_uses_lowercase_names_in_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        ProjectSettings::default().save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"num_images\": 10,"));
        assert!(text.contains("\"interpolation_method\": \"idpp\""));
        assert!(text.contains("\"xtb_gfn\": \"gfn2\""));
        assert!(text.contains("\"xtb_solvation\": null"));
        let climb = text.find("neb_climb").unwrap();
        let method = text.find("neb_method").unwrap();
        assert!(climb < method);
    }

    #[test]
    fn unknown_choice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let mut value = serde_json::to_value(ProjectSettings::default()).unwrap();
        value["neb_optimizer"] = serde_json::json!("bfgs");
        std::fs::write(&path, value.to_string()).unwrap();

        let err = ProjectSettings::load(&path).unwrap_err();
        assert!(matches!(err, ProjectError::Settings { .. }));
    }

    #[rstest]
    #[case::zero_images(ProjectSettings { num_images: 0, ..ProjectSettings::default() })]
    #[case::zero_parallel(ProjectSettings { neb_parallel: 0, ..ProjectSettings::default() })]
    #[case::solvation_without_solvent(ProjectSettings {
        xtb_solvation: Some(Solvation::Gbsa),
        ..ProjectSettings::default()
    })]
    fn validate_rejects(#[case] settings: ProjectSettings) {
        assert!(matches!(settings.validate(), Err(ProjectError::Invalid(_))));
    }

    #[test]
    fn defaults_are_valid() {
        let settings = ProjectSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.num_nodes(), 12);
    }
}
