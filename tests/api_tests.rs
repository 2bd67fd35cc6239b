mod common;

use axum::http::{header, StatusCode};
use serde_json::{json, Value};

use common::{bearer, question, TestApp};

#[tokio::test]
async fn test_subject_lifecycle() {
    let app = TestApp::new().await;
    let token = app.user_token().await;

    let response = app
        .server
        .post("/api/subjects")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "name": "Physics", "sort_order": "2" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["name"], "Physics");
    assert_eq!(body["data"]["color"], "#4299e1");
    assert_eq!(body["data"]["icon"], "fas fa-book");
    assert_eq!(body["data"]["sort_order"], 2);
    assert_eq!(body["data"]["question_count"], 0);
    let subject_id = body["data"]["id"].as_i64().unwrap();

    let body: Value = app
        .server
        .put(&format!("/api/subjects/{}", subject_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "color": "#9f7aea", "icon": "" }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["color"], "#9f7aea");
    assert_eq!(body["data"]["icon"], "fas fa-book");
    assert_eq!(body["data"]["name"], "Physics");

    let body: Value = app
        .server
        .put(&format!("/api/subjects/{}", subject_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "name": "   " }))
        .await
        .json();
    assert_eq!(body["code"], 1);

    let response = app
        .server
        .delete(&format!("/api/subjects/{}", subject_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status_ok();

    let body: Value = app
        .server
        .get("/api/subjects")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let response = app
        .server
        .delete(&format!("/api/subjects/{}", subject_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subject_requires_name() {
    let app = TestApp::new().await;
    let token = app.user_token().await;

    let body: Value = app
        .server
        .post("/api/subjects")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "color": "#fff" }))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Subject name cannot be empty");
}

#[tokio::test]
async fn test_question_create_and_detail() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let subject_id = app.create_subject(&token, "Math").await;

    let created = app
        .create_question(
            &token,
            json!({
                "subject_id": subject_id,
                "question_type": "single_choice",
                "title": "  Slope of a line ",
                "content": "Find the slope of y = 3x + 1",
                "answer": "3",
                "difficulty": "2",
                "is_important": 1,
                "options": [
                    { "option_key": "A", "option_text": "3", "is_correct": true, "sort_order": 1 },
                    { "option_key": "B", "option_text": "1", "sort_order": 2 },
                    { "option_key": "", "option_text": "dropped" }
                ],
                "tags": ["algebra", null, "  ", "lines"],
                "images": ["/static/uploads/questions/a.png", ""]
            }),
        )
        .await;

    assert_eq!(created["title"], "Slope of a line");
    assert_eq!(created["subject_name"], "Math");
    assert_eq!(created["difficulty"], 2);
    assert_eq!(created["review_status"], 0);
    assert_eq!(created["is_important"], true);
    assert_eq!(created["tags"], json!(["algebra", "lines"]));
    assert_eq!(created["images"], json!(["/static/uploads/questions/a.png"]));
    assert_eq!(created["options"].as_array().unwrap().len(), 2);
    assert_eq!(created["options"][0]["is_correct"], true);

    let id = created["id"].as_i64().unwrap();
    let body: Value = app
        .server
        .get(&format!("/api/questions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["answer"], "3");

    let subjects: Value = app
        .server
        .get("/api/subjects")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(subjects["data"][0]["question_count"], 1);
}

#[tokio::test]
async fn test_question_create_reports_missing_fields() {
    let app = TestApp::new().await;
    let token = app.user_token().await;

    let body: Value = app
        .server
        .post("/api/questions")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "title": "Only a title" }))
        .await
        .json();
    assert_eq!(body["code"], 1);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("question_type"));
    assert!(message.contains("difficulty"));
    assert!(message.contains("content"));
    assert!(message.contains("answer"));
    assert!(!message.contains("title"));

    let body: Value = app
        .server
        .post("/api/questions")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&question("Too hard", "x", 7))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Difficulty must be between 1 and 3");

    let mut unknown_subject = question("Orphan", "x", 1);
    unknown_subject["subject_id"] = json!(4242);
    let response = app
        .server
        .post("/api/questions")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&unknown_subject)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_question_images_stand_in_for_text() {
    let app = TestApp::new().await;
    let token = app.user_token().await;

    let created = app
        .create_question(
            &token,
            json!({
                "title": "Photo question",
                "question_type": "essay",
                "difficulty": 1,
                "images": ["/static/uploads/questions/q.png"],
                "answer_images": ["/static/uploads/questions/a.png"]
            }),
        )
        .await;
    assert_eq!(created["content"], Value::Null);
    assert_eq!(created["answer_images"], json!(["/static/uploads/questions/a.png"]));
}

#[tokio::test]
async fn test_question_update_merges_fields() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let subject_id = app.create_subject(&token, "Chemistry").await;

    let mut payload = question("Molar mass", "44", 2);
    payload["subject_id"] = json!(subject_id);
    payload["tags"] = json!(["moles"]);
    let created = app.create_question(&token, payload).await;
    let id = created["id"].as_i64().unwrap();

    let body: Value = app
        .server
        .put(&format!("/api/questions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "error_reason": "Forgot the second oxygen", "subject_id": null }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["error_reason"], "Forgot the second oxygen");
    assert_eq!(body["data"]["subject_id"], Value::Null);
    assert_eq!(body["data"]["title"], "Molar mass");
    assert_eq!(body["data"]["tags"], json!(["moles"]));

    let body: Value = app
        .server
        .put(&format!("/api/questions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "review_status": 3 }))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Review status must be 0 or 1");
}

#[tokio::test]
async fn test_question_delete_and_unknown_ids() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let created = app.create_question(&token, question("Disposable", "1", 1)).await;
    let id = created["id"].as_i64().unwrap();

    let response = app
        .server
        .delete(&format!("/api/questions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status_ok();

    for path in [format!("/api/questions/{}", id), "/api/questions/abc".to_string()] {
        let response = app
            .server
            .get(&path)
            .add_header(header::AUTHORIZATION, bearer(&token))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["code"], 404);
    }
}

#[tokio::test]
async fn test_question_list_filters_and_pagination() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let math = app.create_subject(&token, "Math").await;

    for index in 1..=12 {
        let mut payload = question(&format!("Equation {}", index), "x", 1 + index % 3);
        if index % 2 == 0 {
            payload["subject_id"] = json!(math);
        }
        app.create_question(&token, payload).await;
    }
    let mut keyword = question("Quadratic roots", "2", 3);
    keyword["content"] = json!("Solve the discriminant case");
    app.create_question(&token, keyword).await;

    let body: Value = app
        .server
        .get("/api/questions")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total"], 13);
    assert_eq!(body["data"]["page"], 1);
    assert_eq!(body["data"]["page_size"], 10);
    assert_eq!(body["data"]["list"].as_array().unwrap().len(), 10);

    let body: Value = app
        .server
        .get("/api/questions?page=2&page_size=10")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["list"].as_array().unwrap().len(), 3);

    let body: Value = app
        .server
        .get(&format!("/api/questions?subject_id={}", math))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total"], 6);

    let body: Value = app
        .server
        .get("/api/questions?keyword=DISCRIMINANT")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["list"][0]["title"], "Quadratic roots");

    let body: Value = app
        .server
        .get("/api/questions?subject_id=0&difficulty=&page_size=500")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total"], 13);
    assert_eq!(body["data"]["page_size"], 100);
}

#[tokio::test]
async fn test_review_flow() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let first = app.create_question(&token, question("Review me", "1", 1)).await;
    let second = app.create_question(&token, question("Review me too", "2", 2)).await;
    let first_id = first["id"].as_i64().unwrap();
    let second_id = second["id"].as_i64().unwrap();

    let body: Value = app
        .server
        .get("/api/review/stats")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["pending_count"], 2);
    assert_eq!(body["data"]["today_count"], 0);
    assert_eq!(body["data"]["streak_days"], 0);

    let body: Value = app
        .server
        .post(&format!("/api/review/{}", first_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "result": " Mastered " }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["review_count"], 1);
    assert_eq!(body["data"]["review_status"], 1);
    assert_eq!(body["data"]["mastery_status"], "mastered");

    let body: Value = app
        .server
        .post(&format!("/api/review/{}", second_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "result": "hard" }))
        .await
        .json();
    assert_eq!(body["data"]["review_status"], 0);

    let body: Value = app
        .server
        .post(&format!("/api/review/{}", second_id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "result": "perfect" }))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Invalid review result");

    let body: Value = app
        .server
        .get("/api/review/stats")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["today_count"], 2);
    assert_eq!(body["data"]["pending_count"], 1);
    assert_eq!(body["data"]["reviewed_count"], 1);
    assert_eq!(body["data"]["streak_days"], 1);

    // Pending queue, paginated form
    let body: Value = app
        .server
        .get("/api/review/list")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["list"][0]["id"], second_id);

    // Hard marks the question important; bare-limit form returns a plain list
    let body: Value = app
        .server
        .get("/api/review/list?mode=important&limit=5")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["mastery_status"], "hard");
}

#[tokio::test]
async fn test_exam_generate_and_submit() {
    let app = TestApp::new().await;
    let token = app.user_token().await;

    let body: Value = app
        .server
        .post("/api/exam/generate")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({}))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "No questions match the selected criteria");

    let mut ids = Vec::new();
    for (title, answer) in [("Sum", "4"), ("Product", "Have Lived"), ("Ratio", "1/2")] {
        let created = app.create_question(&token, question(title, answer, 1)).await;
        ids.push(created["id"].as_i64().unwrap());
    }

    let body: Value = app
        .server
        .post("/api/exam/generate")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_count": 3 }))
        .await
        .json();
    assert_eq!(body["code"], 1);

    let body: Value = app
        .server
        .post("/api/exam/generate")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_count": 5, "difficulty_mode": "simple", "time_limit": 30 }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["question_count"], 3);
    assert_eq!(body["data"]["time_limit"], 30);
    assert_eq!(body["data"]["exam_id"], Value::Null);

    let body: Value = app
        .server
        .post("/api/exam/submit")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({
            "question_ids": ids,
            "answers": {
                ids[0].to_string(): 4,
                ids[1].to_string(): "have lived"
            },
            "time_used": 95
        }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    let result = &body["data"];
    assert_eq!(result["total"], 3);
    assert_eq!(result["correct_count"], 2);
    assert_eq!(result["wrong_count"], 0);
    assert_eq!(result["unanswered_count"], 1);
    assert_eq!(result["accuracy"], 66.7);
    assert_eq!(result["time_used"], 95);
    assert_eq!(result["details"][2]["my_answer"], "Not answered");

    let body: Value = app
        .server
        .post("/api/exam/submit")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_ids": [ids[0], 9999] }))
        .await
        .json();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Some questions do not exist");

    let body: Value = app
        .server
        .post("/api/exam/submit")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_ids": [] }))
        .await
        .json();
    assert_eq!(body["message"], "Question id list cannot be empty");
}

#[tokio::test]
async fn test_save_wrong_question() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let created = app.create_question(&token, question("Missed", "7", 2)).await;
    let id = created["id"].as_i64().unwrap();

    let body: Value = app
        .server
        .post("/api/exam/save-wrong-question")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_id": id.to_string(), "error_reason": "Rushed the arithmetic" }))
        .await
        .json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["question_id"], id);

    let detail: Value = app
        .server
        .get(&format!("/api/questions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(detail["data"]["error_reason"], "Rushed the arithmetic");

    let response = app
        .server
        .post("/api/exam/save-wrong-question")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "question_id": 12345 }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let body: Value = app
        .server
        .post("/api/exam/save-wrong-question")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({}))
        .await
        .json();
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn test_dashboard_aggregates() {
    let app = TestApp::new().await;
    let token = app.user_token().await;
    let math = app.create_subject(&token, "Math").await;
    app.create_subject(&token, "Empty").await;

    let mut ids = Vec::new();
    for index in 0..4 {
        let mut payload = question(&format!("Dashboard {}", index), "1", 1);
        if index < 3 {
            payload["subject_id"] = json!(math);
        }
        ids.push(app.create_question(&token, payload).await["id"].as_i64().unwrap());
    }
    app.server
        .post(&format!("/api/review/{}", ids[0]))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "result": "mastered" }))
        .await
        .assert_status_ok();
    app.server
        .post(&format!("/api/review/{}", ids[1]))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "result": "forgot" }))
        .await
        .assert_status_ok();

    let body: Value = app
        .server
        .get("/api/dashboard/stats")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["total_count"], 4);
    assert_eq!(body["data"]["subject_count"], 2);
    assert_eq!(body["data"]["reviewed_count"], 1);
    assert_eq!(body["data"]["pending_count"], 3);
    assert_eq!(body["data"]["review_rate"], 25.0);
    assert_eq!(body["data"]["week_reviewed_count"], 1);

    let body: Value = app
        .server
        .get("/api/dashboard/subject-distribution")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"], json!([{ "name": "Math", "value": 3, "color": "#4299e1" }]));

    let body: Value = app
        .server
        .get("/api/dashboard/review-trend")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(body["data"]["dates"].as_array().unwrap().len(), 7);
    assert_eq!(body["data"]["counts"][6], 2);

    let body: Value = app
        .server
        .get("/api/dashboard/mastery-status")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .json();
    let shares = body["data"].as_array().unwrap();
    let value_of = |status: &str| {
        shares
            .iter()
            .find(|s| s["status"] == status)
            .map(|s| s["value"].as_i64().unwrap())
    };
    assert_eq!(value_of("mastered"), Some(1));
    assert_eq!(value_of("forgot"), Some(1));
    assert_eq!(value_of("hard"), Some(0));
    assert_eq!(value_of("none"), Some(2));
}

#[tokio::test]
async fn test_pages_render_from_templates() {
    let app = TestApp::new().await;
    let templates = app.root.path().join("templates");
    std::fs::write(templates.join("login.html"), "<h1>login page</h1>").unwrap();
    std::fs::write(templates.join("dashboard.html"), "<h1>dashboard page</h1>").unwrap();

    let response = app.server.get("/").await;
    response.assert_status_ok();
    assert!(response.text().contains("login page"));

    let response = app.server.get("/dashboard").await;
    response.assert_status_ok();
    assert!(response.text().contains("dashboard page"));

    app.server.get("/missing-page").await.assert_status(StatusCode::NOT_FOUND);
    app.server.get("/register").await.assert_status(StatusCode::NOT_FOUND);
}
