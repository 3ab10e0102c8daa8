use serde::{Deserialize, Serialize};

/// A tracked brand with its match aliases in storage order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
}

/// Immutable brand/alias snapshot, loaded once per run and shared by every
/// persistence call in that run.
#[derive(Debug, Clone, Default)]
pub struct BrandCatalog {
    brands: Vec<Brand>,
}

impl BrandCatalog {
    pub fn new(brands: Vec<Brand>) -> Self {
        Self { brands }
    }

    pub fn brands(&self) -> &[Brand] {
        &self.brands
    }
}
