use md2_sql::SqlError;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("list store connection failed: {0}")]
    Connection(String),
    #[error("list store command failed: {0}")]
    Command(String),
    #[error("raster_step call failed: {0}")]
    Sql(#[from] SqlError),
    #[error("raster_step call timed out")]
    Timeout,
}
