use serde::{Deserialize, Serialize};

/// A product as described by the catalog collaborator.
///
/// `inventory_count` is the starting stock; the live count is event-sourced
/// in [`MachineState`](super::machine::MachineState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    #[serde(rename = "price")]
    pub price_minor_units: i64,
    #[serde(rename = "inventory")]
    pub inventory_count: i64,
    pub tracks_inventory: bool,
}

impl Product {
    pub fn new(sku: impl Into<String>, price_minor_units: i64) -> Self {
        let sku = sku.into();
        Self {
            name: sku.clone(),
            sku,
            price_minor_units,
            inventory_count: 0,
            tracks_inventory: false,
        }
    }

    pub fn tracked(mut self, inventory_count: i64) -> Self {
        self.inventory_count = inventory_count;
        self.tracks_inventory = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Read-only product list plus owner contact metadata.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
    owner_contact: Option<String>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            owner_contact: None,
        }
    }

    pub fn with_owner_contact(mut self, contact: impl Into<String>) -> Self {
        self.owner_contact = Some(contact.into());
        self
    }

    pub fn get(&self, sku: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.sku == sku)
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn owner_contact(&self) -> Option<&str> {
        self.owner_contact.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup_preserves_order() {
        let catalog = Catalog::new(vec![
            Product::new("B", 150),
            Product::new("A", 125).tracked(3).named("Cola"),
        ])
        .with_owner_contact("owner@example.com");

        assert_eq!(catalog.get("A").unwrap().name, "Cola");
        assert!(catalog.get("A").unwrap().tracks_inventory);
        assert!(catalog.get("Z").is_none());
        assert_eq!(catalog.products()[0].sku, "B");
        assert_eq!(catalog.owner_contact(), Some("owner@example.com"));
    }
}
