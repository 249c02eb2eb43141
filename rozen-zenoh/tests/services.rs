mod common;

use common::{AddTwoInts, AddTwoIntsRequest, AddTwoIntsResponse};
use rozen_zenoh::RequestHeader;
use std::time::Duration;

#[test]
fn request_response_roundtrip_with_headers() {
    let context = common::context(21);
    let node = context.create_node("adder", None).unwrap();
    let service = node.create_service::<AddTwoInts>("/add_two_ints", None).unwrap();
    let client = node.create_client::<AddTwoInts>("/add_two_ints", None).unwrap();

    assert!(common::wait_until(Duration::from_secs(10), || client
        .service_is_available()));

    let sequence = client
        .send_request(&AddTwoIntsRequest { a: 2, b: 3 })
        .unwrap();
    assert_eq!(sequence, 1);

    let mut request = None;
    assert!(common::wait_until(Duration::from_secs(10), || {
        request = service.take_request().unwrap();
        request.is_some()
    }));
    let (request, request_header) = request.unwrap();
    assert_eq!(request, AddTwoIntsRequest { a: 2, b: 3 });
    assert_eq!(request_header.sequence_number, 1);
    assert_eq!(request_header.writer_guid, client.gid());
    assert!(request_header.received_timestamp >= request_header.source_timestamp);

    service
        .send_response(&request_header, &AddTwoIntsResponse { sum: 5 })
        .unwrap();

    let mut response = None;
    assert!(common::wait_until(Duration::from_secs(10), || {
        response = client.take_response().unwrap();
        response.is_some()
    }));
    let (response, response_header) = response.unwrap();
    assert_eq!(response.sum, 5);
    assert_eq!(response_header.sequence_number, 1);
    assert_eq!(response_header.writer_guid, client.gid());
}

#[test]
fn responses_route_back_per_request() {
    let context = common::context(22);
    let node = context.create_node("multi_adder", None).unwrap();
    let service = node.create_service::<AddTwoInts>("/sums", None).unwrap();
    let client = node.create_client::<AddTwoInts>("/sums", None).unwrap();

    assert!(common::wait_until(Duration::from_secs(10), || client
        .service_is_available()));

    for value in 1..=3 {
        client
            .send_request(&AddTwoIntsRequest { a: value, b: value })
            .unwrap();
    }

    let mut headers: Vec<RequestHeader> = Vec::new();
    assert!(common::wait_until(Duration::from_secs(10), || {
        while let Some((request, header)) = service.take_request().unwrap() {
            service
                .send_response(
                    &header,
                    &AddTwoIntsResponse {
                        sum: request.a + request.b,
                    },
                )
                .unwrap();
            headers.push(header);
        }
        headers.len() >= 3
    }));
    assert_eq!(
        headers.iter().map(|h| h.sequence_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let mut responses = Vec::new();
    assert!(common::wait_until(Duration::from_secs(10), || {
        while let Some((response, header)) = client.take_response().unwrap() {
            responses.push((response.sum, header.sequence_number));
        }
        responses.len() >= 3
    }));
    responses.sort();
    assert_eq!(responses, vec![(2, 1), (4, 2), (6, 3)]);
}

#[test]
fn stale_response_is_a_silent_no_op() {
    let context = common::context(23);
    let node = context.create_node("quiet_adder", None).unwrap();
    let service = node.create_service::<AddTwoInts>("/quiet", None).unwrap();
    let client = node.create_client::<AddTwoInts>("/quiet", None).unwrap();

    // No request was ever taken under this header; the client may simply
    // have given up, so replying succeeds without sending anything.
    let header = RequestHeader {
        writer_guid: client.gid(),
        sequence_number: 99,
        source_timestamp: 0,
        received_timestamp: 0,
    };
    service
        .send_response(&header, &AddTwoIntsResponse { sum: 0 })
        .unwrap();
}

#[test]
fn availability_follows_server_lifetime() {
    let context = common::context(24);
    let node = context.create_node("watcher", None).unwrap();
    let client = node.create_client::<AddTwoInts>("/flaky", None).unwrap();
    assert!(!client.service_is_available());

    let service = node.create_service::<AddTwoInts>("/flaky", None).unwrap();
    assert!(common::wait_until(Duration::from_secs(10), || client
        .service_is_available()));

    service.shutdown().unwrap();
    assert!(common::wait_until(Duration::from_secs(10), || !client
        .service_is_available()));
}
