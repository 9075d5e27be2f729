fn main() -> anyhow::Result<()> {
    distribution_bench::cmdline::bench_cmdline()
}
