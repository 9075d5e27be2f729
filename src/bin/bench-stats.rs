fn main() -> anyhow::Result<()> {
    distribution_bench::cmdline::stats_cmdline()
}
