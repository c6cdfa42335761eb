use etl::regions::Region;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    etl::cli::region_main(Region::Asturias).await
}
