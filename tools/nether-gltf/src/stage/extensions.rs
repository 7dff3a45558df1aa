//! Extension declarations added by configuration

use super::Stage;
use crate::error::Result;
use crate::model::AssetModel;

/// Adds names to `extensionsUsed` / `extensionsRequired`
///
/// Required names are also declared as used. Names already present are not
/// repeated.
pub struct DeclareExtensions {
    used: Vec<String>,
    required: Vec<String>,
}

impl DeclareExtensions {
    pub fn new(used: Vec<String>, required: Vec<String>) -> Self {
        Self { used, required }
    }
}

impl Stage for DeclareExtensions {
    fn name(&self) -> &str {
        "declare-extensions"
    }

    fn apply(&self, mut model: AssetModel) -> Result<AssetModel> {
        for name in &self.used {
            model.declare_extension(name, false);
        }
        for name in &self.required {
            model.declare_extension(name, true);
        }
        Ok(model)
    }
}
