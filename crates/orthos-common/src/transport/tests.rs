//! Transport tests
//!
//! A real listener and client exchanging frames over loopback, plus the
//! shutdown behaviour of the accept loop.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::protocol::{LoadSample, OrthosError, Request, RequestBody, Response, ResponseBody};
    use crate::transport::{ShutdownHandle, ShutdownSignal, TcpServer, TcpTransport};

    async fn echo_load(request: Request) -> crate::Result<Response> {
        match request.body {
            RequestBody::Load => Ok(Response::load(request.id, LoadSample::new(1, 2))),
            RequestBody::Info => Err(OrthosError::RunFailure {
                module: "echo".into(),
                message: "no info".into(),
            }),
            _ => Ok(Response::ack(request.id)),
        }
    }

    #[tokio::test]
    async fn test_request_round_trip_over_loopback() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = ShutdownHandle::new();
        let handle = tokio::spawn(server.run_until(echo_load, shutdown.clone()));

        let transport = TcpTransport::new();
        let mut stream = transport.connect(&addr).await.unwrap();

        let request = Request::load();
        let response = transport.send_request(&mut stream, &request).await.unwrap();
        assert_eq!(response.id, request.id);
        assert_eq!(
            response.body,
            ResponseBody::Load {
                sample: LoadSample::new(1, 2)
            }
        );

        // same connection keeps serving
        let response = transport.send_request(&mut stream, &Request::load()).await.unwrap();
        assert!(!response.is_error());

        shutdown.graceful();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_request_is_acknowledged_then_stops_server() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = ShutdownHandle::new();
        let handle = tokio::spawn(server.run_until(echo_load, shutdown.clone()));

        let transport = TcpTransport::new();
        let mut stream = transport.connect(&addr).await.unwrap();
        let response = transport
            .send_request(&mut stream, &Request::shutdown(false))
            .await
            .unwrap();
        assert_eq!(response.body, ResponseBody::Ack);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(shutdown.current(), ShutdownSignal::Graceful);
        assert!(transport.connect(&addr).await.is_err());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run_until(echo_load, ShutdownHandle::new()));

        let transport = TcpTransport::new();
        let mut stream = transport.connect(&addr).await.unwrap();
        let response = transport
            .send_request(&mut stream, &Request::info())
            .await
            .unwrap();

        assert!(response.is_error());
        match response.body {
            ResponseBody::Error { message, .. } => assert_eq!(message, "no info"),
            other => panic!("expected error body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forced_shutdown_aborts_in_flight_request() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = ShutdownHandle::new();

        let slow = |request: Request| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, OrthosError>(Response::ack(request.id))
        };
        let handle = tokio::spawn(server.run_until(slow, shutdown.clone()));

        let transport = TcpTransport::new();
        let client = tokio::spawn(async move {
            let mut stream = transport.connect(&addr).await.unwrap();
            transport.send_request(&mut stream, &Request::load()).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.force();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("forced shutdown should not wait for the handler")
            .unwrap()
            .unwrap();

        let result = client.await.unwrap();
        assert!(result.is_err());
    }
}
