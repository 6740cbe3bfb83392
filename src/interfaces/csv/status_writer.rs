use crate::application::orchestrator::MachineStatus;
use crate::domain::product::Catalog;
use crate::error::Result;
use std::io::Write;

/// Writes the machine status as CSV.
///
/// First a `state,escrow,selected` block, then one
/// `sku,inventory,vend_count,revenue` row per catalog product. Inventory is
/// blank for products that do not track stock.
pub struct StatusWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StatusWriter<W> {
    pub fn new(destination: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(destination);
        Self { writer }
    }

    pub fn write_status(&mut self, status: &MachineStatus, catalog: &Catalog) -> Result<()> {
        let escrow = status.escrow.to_string();
        self.writer.write_record(["state", "escrow", "selected"])?;
        self.writer.write_record([
            status.state.as_str(),
            escrow.as_str(),
            status.selected_sku.as_deref().unwrap_or(""),
        ])?;

        self.writer
            .write_record(["sku", "inventory", "vend_count", "revenue"])?;
        for product in catalog.products() {
            let inventory = status
                .inventory
                .get(&product.sku)
                .map(i64::to_string)
                .unwrap_or_default();
            let sales = status.sales.get(&product.sku).copied().unwrap_or_default();
            self.writer.write_record([
                product.sku.clone(),
                inventory,
                sales.vend_count.to_string(),
                sales.revenue_minor_units.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
