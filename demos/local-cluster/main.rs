use std::{net::SocketAddr, time::Duration};

use dynamo_store::{Dynamo, QuorumOutcome};
use log::LevelFilter;
use simplelog::{ConfigBuilder, SimpleLogger};

const BASE_PORT: u16 = 7000;

#[tokio::main]
pub async fn main() -> dynamo_store::Result<()> {
    let _ = SimpleLogger::init(LevelFilter::Info, ConfigBuilder::new().build());

    let number_of_nodes_to_start: u16 = std::env::args()
        .find_map(|arg| arg.parse::<u16>().ok().filter(|n| *n > 1 && *n <= 20))
        .unwrap_or(3);
    let data_dir = std::env::temp_dir().join("dynamo-store-demo");

    log::info!("Starting {} nodes", number_of_nodes_to_start);

    let seed = SocketAddr::from(([127, 0, 0, 1], BASE_PORT));
    let mut nodes = Vec::new();
    for i in 0..number_of_nodes_to_start {
        let node = Dynamo::builder(
            format!("node-{}", i).as_str(),
            SocketAddr::from(([127, 0, 0, 1], BASE_PORT + i)),
        )
        .with_seed_nodes(&[seed])
        .with_io_port(BASE_PORT + 100 + i)
        .with_ack_port(BASE_PORT + 200 + i)
        .with_replicas(2)
        .with_quorum_timeout(Duration::from_secs(5))
        .with_data_dir(data_dir.join(format!("node-{}", i)))
        .start()
        .await?;
        nodes.push(node);
    }

    // let a few gossip rounds go by
    tokio::time::sleep(Duration::from_secs(3)).await;
    for node in &nodes {
        let peers: Vec<String> = node
            .active_nodes()
            .await
            .iter()
            .map(|n| n.id.to_string())
            .collect();
        log::info!("{} knows {:?}", node.this_node().await.id, peers);
    }

    let (first, last) = (&nodes[0], &nodes[nodes.len() - 1]);
    report("create bucket", first.create_bucket("demo").await?);
    report("create object", first.create_object("demo", "greeting", "hello").await?);
    report("read object", last.read_object("demo", "greeting").await?);
    report("update object", last.update_object("demo", "greeting", "bonjour").await?);
    report("read object", first.read_object("demo", "greeting").await?);
    report("delete object", first.delete_object("demo", "greeting").await?);
    report("delete bucket", last.delete_bucket("demo").await?);

    tokio::signal::ctrl_c().await?;
    for node in &nodes {
        node.shutdown();
    }
    Ok(())
}

fn report(operation: &str, outcome: QuorumOutcome) {
    log::info!(
        "{}: {:?}, {}/{} replicas, success={}{}",
        operation,
        outcome.state,
        outcome.received,
        outcome.required,
        outcome.is_success(),
        outcome
            .value
            .map(|v| format!(", value={:?}", v))
            .unwrap_or_default()
    );
}
