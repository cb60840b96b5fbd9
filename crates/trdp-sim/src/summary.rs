use trdp_runtime::{classify_direction, ConfigLoadResult};

/// Print a human-readable overview of a loaded configuration.
pub fn print(loaded: &ConfigLoadResult) {
    let config = &loaded.config;
    println!(
        "{} interface(s), {} telegram(s), {} dataset(s)",
        config.interfaces.len(),
        config.telegram_count(),
        config.datasets.len()
    );

    for iface in &config.interfaces {
        let leader = if iface.leader_ip.is_empty() { "-" } else { iface.leader_ip.as_str() };
        println!();
        println!(
            "Interface {} (network {}) host {} leader {}",
            iface.name, iface.network_id, iface.host_ip, leader
        );
        for telegram in &iface.telegrams {
            let direction = classify_direction(&iface.host_ip, telegram);
            let cycle = telegram
                .cycle_time_us
                .map(|us| format!("{} ms", us / 1000))
                .unwrap_or_else(|| "-".into());
            println!(
                "  comId {:>6}  {:<8}  {:<11}  dataset {:<5} cycle {:<8} {}",
                telegram.com_id,
                direction.to_string(),
                telegram.exchange_type.to_string(),
                telegram.dataset_id,
                cycle,
                telegram.name
            );
            for dst in &telegram.destinations {
                println!("      Dest {}: {} ({})", dst.id, dst.uri_host, dst.uri_user);
            }
            for src in &telegram.sources {
                println!("      Src  {}: {} ({})", src.id, src.uri_host, src.uri_user);
            }
        }
    }

    if !config.datasets.is_empty() {
        println!();
        println!("Datasets");
        for dataset in &config.datasets {
            println!(
                "  {:>5}  {} ({} element(s))",
                dataset.id,
                dataset.name,
                dataset.elements.len()
            );
            for element in &dataset.elements {
                println!(
                    "         {:<20} {} x{}",
                    element.name, element.element_type, element.array_size
                );
            }
        }
    }

    if loaded.has_errors() {
        println!();
        println!("Problems");
        for problem in &loaded.errors {
            println!("  - {problem}");
        }
    }
}
