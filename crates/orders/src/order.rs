use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EmailAddress, TenantId};

use crate::reference::OrderReference;

/// Order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle.
///
/// Orders start as `NewOrder` unless the caller says otherwise. `Delivered`
/// and `Cancelled` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    NewOrder,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::NewOrder,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::NewOrder => "new_order",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

/// Who the order is for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: Option<EmailAddress>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Line as submitted by the caller (no line number yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_name: String,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g. millimes).
    pub unit_price: u64,
}

/// Order line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: u64,
}

impl OrderLine {
    pub fn subtotal(&self) -> u64 {
        u64::from(self.quantity).saturating_mul(self.unit_price)
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    reference: Option<OrderReference>,
    status: OrderStatus,
    customer: CustomerInfo,
    lines: Vec<OrderLine>,
    note: Option<String>,
    placed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    placed: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: None,
            status: OrderStatus::default(),
            customer: CustomerInfo::default(),
            lines: Vec::new(),
            note: None,
            placed_at: None,
            updated_at: None,
            version: 0,
            placed: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Assigned once at placement; `None` only for an unplaced instance.
    pub fn reference(&self) -> Option<&OrderReference> {
        self.reference.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn customer(&self) -> &CustomerInfo {
        &self.customer
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Sum of line subtotals, in smallest currency unit.
    pub fn total(&self) -> u64 {
        self.lines
            .iter()
            .fold(0u64, |acc, line| acc.saturating_add(line.subtotal()))
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
///
/// `reference` is computed by the caller from the per-year sequence; `status`
/// falls back to `new_order` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reference: OrderReference,
    pub status: Option<OrderStatus>,
    pub customer: CustomerInfo,
    pub lines: Vec<NewOrderLine>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reference: OrderReference,
    pub status: OrderStatus,
    pub customer: CustomerInfo,
    pub lines: Vec<OrderLine>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = Some(e.reference.clone());
                self.status = e.status;
                self.customer = e.customer.clone();
                self.lines = e.lines.clone();
                self.note = e.note.clone();
                self.placed_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.placed = true;
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.placed {
            return Err(DomainError::conflict("order already placed"));
        }

        if cmd.customer.name.trim().is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot place an order without lines"));
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for (idx, line) in cmd.lines.iter().enumerate() {
            if line.product_name.trim().is_empty() {
                return Err(DomainError::validation("product name is required"));
            }
            if line.quantity == 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            lines.push(OrderLine {
                line_no: idx as u32 + 1,
                product_name: line.product_name.trim().to_string(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reference: cmd.reference.clone(),
            status: cmd.status.unwrap_or_default(),
            customer: CustomerInfo {
                name: cmd.customer.name.trim().to_string(),
                ..cmd.customer.clone()
            },
            lines,
            note: cmd.note.clone().filter(|n| !n.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status == cmd.status {
            return Err(DomainError::conflict(format!(
                "order is already {}",
                cmd.status
            )));
        }

        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot change status of a {} order",
                self.status
            )));
        }

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            from: self.status,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
