use std::path::{Path, PathBuf};

use crate::loader::{ConstructError, ConstructorCall, ModelConstructor, ModelFamily, ModelProvider};
use crate::model::SpeechModel;

use super::model::KokoroModel;

/// The Kokoro family: a full-precision standard graph and a quantized turbo graph.
pub const KOKORO_FAMILY: ModelFamily = ModelFamily {
    name: "Kokoro",
    standard_variant: "kokoro",
    turbo_variant: "kokoro-turbo",
    turbo_aliases: &["kokoro-turbo", "turbo"],
};

/// Graph file of the standard variant.
pub const STANDARD_GRAPH: &str = "kokoro-v1.0.onnx";

/// 8-bit quantized graph of the turbo variant.
pub const TURBO_GRAPH: &str = "kokoro-quant-convinteger.onnx";

/// Builds a [`KokoroModel`] from one graph file.
#[derive(Debug, Clone)]
pub struct KokoroConstructor {
    graph_path: PathBuf,
    model_dir: PathBuf,
}

impl ModelConstructor for KokoroConstructor {
    fn construct(&self, call: ConstructorCall<'_>) -> Result<Box<dyn SpeechModel>, ConstructError> {
        let device = match call {
            ConstructorCall::DeviceKeyword(device) | ConstructorCall::DevicePositional(device) => {
                device
            }
            ConstructorCall::NoArgs => {
                return Err(ConstructError::SignatureMismatch(
                    "Kokoro sessions need a device".to_string(),
                ))
            }
        };

        let model = KokoroModel::load(&self.graph_path, &self.model_dir, device)
            .map_err(ConstructError::failed)?;
        Ok(Box::new(model))
    }
}

/// Kokoro variants installed in a model directory.
///
/// A variant is available only when its graph file exists. The standard
/// variant falls back to any other `.onnx` file in the directory.
#[derive(Debug, Clone)]
pub struct KokoroProvider {
    model_dir: PathBuf,
    standard: Option<KokoroConstructor>,
    turbo: Option<KokoroConstructor>,
}

impl KokoroProvider {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        let model_dir = model_dir.into();
        let constructor = |graph_path: PathBuf| KokoroConstructor {
            graph_path,
            model_dir: model_dir.clone(),
        };

        let turbo = Some(model_dir.join(TURBO_GRAPH))
            .filter(|path| path.is_file())
            .map(constructor);
        let standard = find_standard_graph(&model_dir).map(constructor);

        match (&standard, &turbo) {
            (None, None) => log::warn!("No Kokoro graph found in {}", model_dir.display()),
            _ => log::info!(
                "Kokoro variants in {}: standard={}, turbo={}",
                model_dir.display(),
                standard.is_some(),
                turbo.is_some()
            ),
        }

        Self {
            model_dir,
            standard,
            turbo,
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

impl ModelProvider for KokoroProvider {
    fn family(&self) -> &ModelFamily {
        &KOKORO_FAMILY
    }

    fn entry_point(&self, variant: &str) -> Option<&dyn ModelConstructor> {
        let constructor = if variant == KOKORO_FAMILY.standard_variant {
            self.standard.as_ref()
        } else if variant == KOKORO_FAMILY.turbo_variant {
            self.turbo.as_ref()
        } else {
            None
        };
        constructor.map(|c| c as &dyn ModelConstructor)
    }
}

/// `kokoro-v1.0.onnx`, else the first other `.onnx` file by name.
fn find_standard_graph(model_dir: &Path) -> Option<PathBuf> {
    let preferred = model_dir.join(STANDARD_GRAPH);
    if preferred.is_file() {
        return Some(preferred);
    }

    let mut graphs: Vec<PathBuf> = std::fs::read_dir(model_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "onnx")
                && path.file_name().is_some_and(|name| name != TURBO_GRAPH)
        })
        .collect();
    graphs.sort();
    graphs.into_iter().next()
}
