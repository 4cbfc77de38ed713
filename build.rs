use std::env;

const CHIPS: [&str; 3] = ["ATMEGA328P", "ATMEGA2560", "ATMEGA32U4"];

fn main() {
    // Exactly one chip feature decides the register file and vector table
    let selected: Vec<&str> = CHIPS
        .iter()
        .copied()
        .filter(|chip| env::var_os(format!("CARGO_FEATURE_{chip}")).is_some())
        .collect();

    match selected.len() {
        1 => {}
        0 => panic!("no chip selected: enable one of the atmega328p, atmega2560 or atmega32u4 features"),
        _ => panic!(
            "more than one chip selected ({}); build with --no-default-features and a single chip feature",
            selected.join(", ")
        ),
    }

    if env::var_os("CARGO_FEATURE_TIMER3").is_some()
        && env::var_os("CARGO_FEATURE_WATCHDOG_TICK").is_some()
    {
        panic!("timer3 and watchdog-tick both claim the tick interrupt; pick one");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
