use {
    crate::{
        config::GrpcConfig,
        ledger::error::LedgerError,
        models::{Points, Transaction},
        transaction_processor::{
            TransactionProcessor,
            error::TransactionProcessorError,
            interface::{
                AdminAdjustment, BalanceMigration, Instruction, LineItem, OrderCompletion,
                PointsPayment, TransactionProcessorInterface, TransactionResult,
            },
        },
    },
    rust_decimal::Decimal,
    std::{convert::TryFrom, str::FromStr, sync::Arc},
    tonic::{Request, Response, Status, transport::Server},
    tracing::{error, info, warn},
};

pub mod server {
    tonic::include_proto!("tally");
}

use server::{
    AdjustPointsRequest, CompleteOrderRequest, GetBalanceRequest, GetBalanceResponse,
    GetHistoryRequest, GetHistoryResponse, GetStatisticsRequest, GetStatisticsResponse,
    MigrateBalanceRequest, MutationResponse, MutationStatus, PayWithPointsRequest,
    TransactionRecord,
    points_service_server::{PointsService, PointsServiceServer},
};

pub struct TallyGrpcServer {
    processor: Arc<TransactionProcessor>,
}

impl TallyGrpcServer {
    pub fn new(processor: Arc<TransactionProcessor>) -> Self {
        TallyGrpcServer { processor }
    }
}

fn parse_points(field: &str, value: &str) -> Result<Points, Status> {
    Decimal::from_str(value.trim())
        .map_err(|_| Status::invalid_argument(format!("Invalid {}: {:?}", field, value)))
}

fn require_order_id(order_id: String) -> Result<String, Status> {
    if order_id.trim().is_empty() {
        return Err(Status::invalid_argument("Order ID is required"));
    }
    Ok(order_id)
}

impl TryFrom<CompleteOrderRequest> for Instruction {
    type Error = Status;
    fn try_from(req: CompleteOrderRequest) -> Result<Self, Self::Error> {
        let line_items = req
            .line_items
            .into_iter()
            .map(|item| {
                Ok(LineItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    points_earned_per_unit: parse_points(
                        "points earned per unit",
                        &item.points_earned_per_unit,
                    )?,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;

        Ok(Instruction::CompleteOrder(OrderCompletion {
            order_id: require_order_id(req.order_id)?,
            user_id: req.user_id,
            line_items,
        }))
    }
}

impl TryFrom<AdjustPointsRequest> for Instruction {
    type Error = Status;
    fn try_from(req: AdjustPointsRequest) -> Result<Self, Self::Error> {
        Ok(Instruction::Adjust(AdminAdjustment {
            user_id: req.user_id,
            signed_amount: parse_points("signed amount", &req.signed_amount)?,
            reason: Some(req.reason).filter(|reason| !reason.trim().is_empty()),
        }))
    }
}

impl TryFrom<PayWithPointsRequest> for Instruction {
    type Error = Status;
    fn try_from(req: PayWithPointsRequest) -> Result<Self, Self::Error> {
        Ok(Instruction::PayWithPoints(PointsPayment {
            order_id: require_order_id(req.order_id)?,
            user_id: req.user_id,
            order_total_points: parse_points("order total points", &req.order_total_points)?,
        }))
    }
}

impl TryFrom<MigrateBalanceRequest> for Instruction {
    type Error = Status;
    fn try_from(req: MigrateBalanceRequest) -> Result<Self, Self::Error> {
        Ok(Instruction::MigrateBalance(BalanceMigration {
            user_id: req.user_id,
            legacy_balance: parse_points("legacy balance", &req.legacy_balance)?,
        }))
    }
}

impl From<&Transaction> for TransactionRecord {
    fn from(transaction: &Transaction) -> Self {
        let (reference_type, reference) = match &transaction.reference {
            Some(reference) => (reference.reference_type.clone(), reference.id.clone()),
            None => Default::default(),
        };

        TransactionRecord {
            id: transaction.id,
            user_id: transaction.user_id,
            delta: transaction.delta.to_string(),
            r#type: transaction.kind.to_string(),
            reference_type,
            reference,
            balance_before: transaction.balance_before.to_string(),
            balance_after: transaction.balance_after.to_string(),
            note: transaction.note.clone(),
            created_at: transaction.created_at.to_rfc3339(),
        }
    }
}

fn ledger_status(error: LedgerError) -> Status {
    match error {
        LedgerError::Storage(e) => Status::unavailable(e.to_string()),
        e @ (LedgerError::InvalidAmount { .. } | LedgerError::AmountOutOfRange { .. }) => {
            Status::invalid_argument(e.to_string())
        }
        other => Status::internal(other.to_string()),
    }
}

fn processor_status(error: TransactionProcessorError) -> Status {
    match error {
        TransactionProcessorError::Ledger(e) => ledger_status(e),
        e @ TransactionProcessorError::InvalidLineItem { .. } => {
            Status::invalid_argument(e.to_string())
        }
    }
}

fn mutation_response(
    result: Result<TransactionResult, TransactionProcessorError>,
) -> Result<Response<MutationResponse>, Status> {
    let response = match result {
        Ok(TransactionResult::Recorded(transaction)) => MutationResponse {
            success: true,
            status: MutationStatus::Recorded as i32,
            transaction: Some((&transaction).into()),
            ..Default::default()
        },
        Ok(TransactionResult::AlreadyAwarded { transaction_id }) => MutationResponse {
            success: true,
            status: MutationStatus::AlreadyAwarded as i32,
            existing_transaction_id: transaction_id,
            ..Default::default()
        },
        Ok(TransactionResult::NothingToAward) => MutationResponse {
            success: true,
            status: MutationStatus::NothingToAward as i32,
            ..Default::default()
        },
        Err(e) => match e.shortage() {
            Some(shortage) => MutationResponse {
                success: false,
                status: MutationStatus::Rejected as i32,
                shortage: shortage.to_string(),
                error_message: e.to_string(),
                ..Default::default()
            },
            None => return Err(processor_status(e)),
        },
    };

    Ok(Response::new(response))
}

/// Runs a synchronous ledger call off the async executor.
async fn blocking<T, F>(operation: F) -> Result<T, Status>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation).await.map_err(|e| {
        error!("Ledger task failed: {}", e);
        Status::internal("Ledger task failed")
    })
}

impl TallyGrpcServer {
    async fn process(
        &self,
        instruction: Instruction,
        operation: &str,
    ) -> Result<Response<MutationResponse>, Status> {
        let processor = Arc::clone(&self.processor);
        let result = blocking(move || processor.process_transaction(instruction)).await?;

        match &result {
            Ok(_) => info!("Successfully processed {} request", operation),
            Err(e) if e.is_retryable() => error!("Failed to process {} request: {}", operation, e),
            Err(e) => warn!("Rejected {} request: {}", operation, e),
        }

        mutation_response(result)
    }
}

#[tonic::async_trait]
impl PointsService for TallyGrpcServer {
    async fn complete_order(
        &self,
        request: Request<CompleteOrderRequest>,
    ) -> Result<Response<MutationResponse>, Status> {
        let instruction = request.into_inner().try_into()?;
        self.process(instruction, "complete_order").await
    }

    async fn adjust_points(
        &self,
        request: Request<AdjustPointsRequest>,
    ) -> Result<Response<MutationResponse>, Status> {
        let instruction = request.into_inner().try_into()?;
        self.process(instruction, "adjust_points").await
    }

    async fn pay_with_points(
        &self,
        request: Request<PayWithPointsRequest>,
    ) -> Result<Response<MutationResponse>, Status> {
        let instruction = request.into_inner().try_into()?;
        self.process(instruction, "pay_with_points").await
    }

    async fn migrate_balance(
        &self,
        request: Request<MigrateBalanceRequest>,
    ) -> Result<Response<MutationResponse>, Status> {
        let instruction = request.into_inner().try_into()?;
        self.process(instruction, "migrate_balance").await
    }

    async fn get_balance(
        &self,
        request: Request<GetBalanceRequest>,
    ) -> Result<Response<GetBalanceResponse>, Status> {
        let user_id = request.into_inner().user_id;
        let ledger = Arc::clone(self.processor.ledger());

        let balance = blocking(move || ledger.get_balance(user_id))
            .await?
            .map_err(ledger_status)?;

        Ok(Response::new(GetBalanceResponse {
            balance: balance.to_string(),
        }))
    }

    async fn get_history(
        &self,
        request: Request<GetHistoryRequest>,
    ) -> Result<Response<GetHistoryResponse>, Status> {
        let req = request.into_inner();
        let ledger = Arc::clone(self.processor.ledger());

        let transactions = blocking(move || {
            ledger.history(req.user_id, req.limit as usize, req.offset as usize)
        })
        .await?
        .map_err(ledger_status)?;

        Ok(Response::new(GetHistoryResponse {
            transactions: transactions.iter().map(TransactionRecord::from).collect(),
        }))
    }

    async fn get_statistics(
        &self,
        _request: Request<GetStatisticsRequest>,
    ) -> Result<Response<GetStatisticsResponse>, Status> {
        let ledger = Arc::clone(self.processor.ledger());

        let stats = blocking(move || ledger.statistics())
            .await?
            .map_err(ledger_status)?;

        Ok(Response::new(GetStatisticsResponse {
            total_points: stats.total_points.to_string(),
            accounts: stats.accounts,
            average_balance: stats.average_balance.to_string(),
            transactions_today: stats.transactions_today,
        }))
    }
}

pub async fn start_grpc_service(
    config: GrpcConfig,
    processor: Arc<TransactionProcessor>,
    mut shutdown_receiver: tokio::sync::broadcast::Receiver<()>,
) {
    let address = format!("{}:{}", config.address, config.port);
    let socket_addr = match std::net::SocketAddr::from_str(&address) {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid gRPC address: {}: {}", address, e);
            return;
        }
    };

    let service = TallyGrpcServer::new(processor);

    let shutdown = async {
        shutdown_receiver.recv().await.ok();
        info!("gRPC server is shutting down...");
    };

    info!("Initializing gRPC server at {}", address);

    if let Err(e) = Server::builder()
        .add_service(PointsServiceServer::new(service))
        .serve_with_shutdown(socket_addr, shutdown)
        .await
    {
        error!("Error in gRPC server: {}", e);
    }
}
