use {
    clap::Parser,
    rand::{Rng, SeedableRng, seq::IndexedRandom},
    std::{sync::Arc, time::Duration},
    tally::{
        config::TallyClientConfig,
        grpc_server::server::{
            AdjustPointsRequest, CompleteOrderRequest, GetBalanceRequest, LineItem,
            MutationStatus, PayWithPointsRequest, points_service_client::PointsServiceClient,
        },
    },
    tokio::sync::RwLock,
    tonic::transport::Channel,
    tracing::{error, info, warn},
    uuid::Uuid,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "client.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = TallyClientConfig::from_file(&args.config)
        .map_err(|e| format!("Failed to load client configuration file: {}", e))?;

    tally::logging::init_logging(config.debug)?;

    // Completed orders, kept around so some of them get delivered again.
    let completed_orders = Arc::new(RwLock::new(Vec::<CompleteOrderRequest>::new()));

    let mut join_handles = Vec::new();
    for worker_id in 0..config.tasks {
        let client = PointsServiceClient::connect(format!(
            "http://{}:{}",
            config.grpc.address, config.grpc.port
        ))
        .await?;
        let handle = tokio::spawn(run_worker(
            worker_id,
            client,
            completed_orders.clone(),
            config.clone(),
        ));
        join_handles.push(handle);
    }

    info!("Starting load generator with {} tasks...", config.tasks);
    for handle in join_handles {
        match handle.await {
            Ok(Err(e)) => error!("Worker stopped: {}", e),
            Err(e) => error!("One of the worker tasks failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    Ok(())
}

fn status_of(status: i32) -> MutationStatus {
    MutationStatus::try_from(status).unwrap_or(MutationStatus::Unspecified)
}

async fn run_worker(
    worker_id: usize,
    mut client: PointsServiceClient<Channel>,
    completed_orders: Arc<RwLock<Vec<CompleteOrderRequest>>>,
    config: TallyClientConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut rng = rand::rngs::StdRng::from_os_rng();

    loop {
        let user_id = rng.random_range(1..=config.users.max(1));
        let operation_chance = rng.random_range(0..100);

        if operation_chance < config.order_chance {
            let redeliver = rng.random_bool(0.1);
            let previous = if redeliver {
                completed_orders.read().await.choose(&mut rng).cloned()
            } else {
                None
            };

            let request = match previous {
                Some(order) => order,
                None => CompleteOrderRequest {
                    order_id: Uuid::new_v4().to_string(),
                    user_id,
                    line_items: (0..rng.random_range(1..4))
                        .map(|_| LineItem {
                            product_id: rng.random_range(1..1000),
                            quantity: rng.random_range(1..5),
                            points_earned_per_unit: rng.random_range(0..200).to_string(),
                        })
                        .collect(),
                },
            };

            let Ok(response) = client.complete_order(request.clone()).await else {
                continue;
            };

            match status_of(response.into_inner().status) {
                MutationStatus::Recorded => {
                    info!(
                        "[Worker {}] Order {} awarded to user {}",
                        worker_id, request.order_id, request.user_id
                    );
                    completed_orders.write().await.push(request);
                }
                MutationStatus::AlreadyAwarded => {
                    info!(
                        "[Worker {}] Order {} was already awarded",
                        worker_id, request.order_id
                    );
                }
                _ => {}
            }
        } else if operation_chance < config.order_chance + config.payment_chance {
            let Ok(balance_response) = client.get_balance(GetBalanceRequest { user_id }).await
            else {
                continue;
            };

            let balance: f64 = balance_response.into_inner().balance.parse().unwrap_or(0.0);
            // Occasionally ask for more than the balance to exercise rejections.
            let amount = rng.random_range(1..=(balance as u64).max(1) + 50);

            let payment = PayWithPointsRequest {
                order_id: Uuid::new_v4().to_string(),
                user_id,
                order_total_points: amount.to_string(),
            };

            match client.pay_with_points(payment).await {
                Ok(response) => {
                    let response = response.into_inner();
                    if response.success {
                        info!("[Worker {}] User {} paid {} points", worker_id, user_id, amount);
                    } else {
                        warn!(
                            "[Worker {}] User {} is {} points short",
                            worker_id, user_id, response.shortage
                        );
                    }
                }
                Err(e) => warn!("[Worker {}] Payment failed: {}", worker_id, e),
            }
        } else {
            let amount = rng.random_range(-50..=100i64);
            if amount == 0 {
                continue;
            }

            let adjustment = AdjustPointsRequest {
                user_id,
                signed_amount: amount.to_string(),
                reason: format!("Load test adjustment by worker {}", worker_id),
            };

            if let Err(e) = client.adjust_points(adjustment).await {
                warn!(
                    "[Worker {}] Adjustment of {} for user {} failed: {}",
                    worker_id, amount, user_id, e
                );
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
