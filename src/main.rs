fn main() -> Result<(), Box<dyn std::error::Error>> {
    mosp_chat::cli::main()
}
