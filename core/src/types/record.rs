/// One synthetic row destined for the benchmark table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub category: String,
    pub amount: f64,
    pub quantity: i32,
    pub description: String,
}
