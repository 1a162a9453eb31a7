fn main() -> anyhow::Result<()> {
    graphql_http_middleware::main()
}
