use blog::{error::AppError, start_server};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    start_server().await
}
