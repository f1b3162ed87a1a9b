use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    keyed_windows::example_apps::run_sweep_demo(std::env::args().skip(1))
}
