use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tableside API",
        version = "0.1.0",
        description = r#"
# Tableside QR Ordering API

Backend for dine-in ordering from a QR code printed on each table.

## Features

- **Sessions**: Scanning a table QR opens (or reuses) the table's dining session
- **Cart**: One shared cart per session, checked out into orders
- **Orders**: New items merge into the session's open order until the kitchen starts it
- **Payments**: Cash, card and bank transfer with VietQR payment codes
- **Settlement**: Staff close out a whole session, optionally redeeming loyalty points
- **Notifications**: Server-Sent Events per room (`STAFF` or `QR_SESSION_{id}`)

## Error Handling

Errors share one envelope:

```json
{
  "error": "Not Found",
  "message": "Order 0b6c... not found",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-12-09T10:30:00.000Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Sessions", description = "QR dining session endpoints"),
        (name = "Cart", description = "Shared session cart endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Payment and settlement endpoints"),
        (name = "Points", description = "Loyalty points endpoints"),
        (name = "Notifications", description = "Real-time notification feed")
    ),
    paths(
        // Sessions
        crate::handlers::qr_sessions::scan,
        crate::handlers::qr_sessions::validate_session,
        crate::handlers::qr_sessions::end_session,

        // Cart
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::create_order_by_admin,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,

        // Payments
        crate::handlers::payments::pay_order,
        crate::handlers::payments::payment_callback,
        crate::handlers::payments::settle_session,

        // Points
        crate::handlers::points::get_customer_points,

        // Notifications
        crate::handlers::notifications::stream,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,
            crate::notifications::NotificationPayload,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_ordering_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Tableside API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/qr-sessions/scan"));
        assert!(json.contains("/api/v1/payment/admin"));
    }
}
