use crate::domain::money::Amount;
use crate::domain::product::{Catalog, Product};
use crate::error::{Result, VendError};
use std::io::Read;

/// Reads products from a CSV source with columns
/// `sku, name, price, inventory, tracks_inventory`.
///
/// Prices are integer minor units.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates products.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(VendError::from).and_then(validate))
    }

    /// Reads the whole catalog. Any bad row fails the load.
    pub fn into_catalog(self) -> Result<Catalog> {
        let products = self.products().collect::<Result<Vec<_>>>()?;
        Ok(Catalog::new(products))
    }
}

fn validate(product: Product) -> Result<Product> {
    Amount::new(product.price_minor_units)?;
    if product.inventory_count < 0 {
        return Err(VendError::InvalidAmount(product.inventory_count));
    }
    Ok(product)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "sku, name, price, inventory, tracks_inventory\n\
                    A1, Cola, 125, 4, true\n\
                    B2, Chips, 150, 0, false";
        let catalog = CatalogReader::new(data.as_bytes()).into_catalog().unwrap();

        assert_eq!(catalog.products().len(), 2);
        let cola = catalog.get("A1").unwrap();
        assert_eq!(cola.name, "Cola");
        assert_eq!(cola.price_minor_units, 125);
        assert!(cola.tracks_inventory);
        assert!(!catalog.get("B2").unwrap().tracks_inventory);
    }

    #[test]
    fn test_reader_rejects_bad_rows() {
        let data = "sku, name, price, inventory, tracks_inventory\n\
                    A1, Cola, 0, 4, true\n\
                    B2, Chips, 1.50, 1, false\n\
                    C3, Gum, 50, -1, true";
        let results: Vec<Result<Product>> = CatalogReader::new(data.as_bytes()).products().collect();

        assert!(matches!(results[0], Err(VendError::InvalidAmount(0))));
        assert!(matches!(results[1], Err(VendError::Csv(_))));
        assert!(matches!(results[2], Err(VendError::InvalidAmount(-1))));
    }
}
