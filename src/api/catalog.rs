use std::collections::HashMap;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::api::ApiUrls;
use crate::app_error::AppError;

pub const APPROVED: &str = "APPROVED";

/// Product as served by the catalog directory, carrying the owning vendor
/// and both approval gates.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CatalogProduct {
    pub id: i32,
    pub vendor_id: i32,
    pub unit_price: i64,
    pub stock: i32,
    pub status: String,
    pub vendor_status: String,
}

impl CatalogProduct {
    pub fn is_sellable(&self) -> bool {
        self.status == APPROVED
    }

    pub fn vendor_approved(&self) -> bool {
        self.vendor_status == APPROVED
    }
}

pub async fn get_products(client: Client, ids: Vec<i32>) -> Result<HashMap<i32, CatalogProduct>> {
    let ids_query = ids
        .into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let url = ApiUrls::get_catalog_service_url();
    let products: Vec<CatalogProduct> = client
        .get(format!("{}/products", url))
        .query(&[("ids", ids_query)])
        .send()
        .await
        .map_err(|_| AppError::ServiceUnreachable("CatalogService".into()))?
        .json()
        .await
        .context("Failed to parse JSON")?;

    let products: HashMap<i32, CatalogProduct> =
        products.into_iter().map(|p| (p.id, p)).collect();

    Ok(products)
}
