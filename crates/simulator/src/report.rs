//! Human-readable run summary.

use meshrpc_simulation::{Behavior, SimulationStats};

/// Print `stats` to stdout.
pub fn print_summary(stats: &SimulationStats) {
    println!("\n=== Simulation Summary ===");
    println!("Requests:          {}", stats.requests);
    println!(
        "Succeeded:         {} ({:.1}%)",
        stats.succeeded,
        stats.success_rate() * 100.0
    );
    println!("Failed:            {}", stats.failed);
    println!("Wrong answers:     {}", stats.wrong_answers);
    println!("Attempts/request:  {:.2}", stats.attempts_per_request());

    if !stats.errors.is_empty() {
        println!("\n=== Errors ===");
        for (kind, count) in &stats.errors {
            println!("  {kind}: {count}");
        }
    }

    println!("\n=== Registry ===");
    println!("Nodes:             {}", stats.registry_size);
    println!("Node list block:   {}", stats.registry_last_block);
    println!("Blacklisted:");
    for behavior in Behavior::ALL {
        println!("  {:<16} {}", behavior.as_str(), stats.blacklisted(behavior));
    }

    let net = &stats.network;
    println!("\n=== Network ===");
    println!("Sends:             {}", net.sends);
    println!("Node requests:     {}", net.node_requests);
    println!("Offline hits:      {}", net.offline_hits);
    println!("Dropped:           {}", net.dropped);
    println!("Lies told:         {}", net.lies_told);
    println!("Node lists served: {}", net.nodelists_served);
    println!("Node lists refused:{}", net.nodelists_refused);
}
