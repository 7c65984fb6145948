#[tokio::main]
async fn main() {
    if let Err(e) = quizflow::run().await {
        eprintln!("quizflow: {e}");
        std::process::exit(1);
    }
}
