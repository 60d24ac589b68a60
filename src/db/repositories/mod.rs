mod break_events;
